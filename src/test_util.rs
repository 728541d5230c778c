use std::time::{Duration, Instant};
use bytes::{Buf, BufMut};
use crate::clock::utc_time_micros;
use crate::error::FramingError;
use crate::mailbox::Mailbox;
use crate::message::{Message, MessageHeader};
use crate::wire::{CheckedBuf, WireStruct};

/// Header-only test message: a running number, plus the time it was packed for sending
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TestHeader {
    pub number: u32,
    pub send_time_micros: u64,
}

impl TestHeader {
    pub fn new(number: u32) -> TestHeader {
        TestHeader {
            number,
            send_time_micros: 0,
        }
    }
}

impl WireStruct for TestHeader {
    const SERIALIZED_LEN: usize = 12;

    fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.number);
        buf.put_u64_le(self.send_time_micros);
    }

    fn deser(buf: &mut impl Buf) -> Result<Self, FramingError> {
        Ok(TestHeader {
            number: buf.checked_u32_le()?,
            send_time_micros: buf.checked_u64_le()?,
        })
    }
}

impl MessageHeader for TestHeader {
    fn sequence_number(&self) -> u32 {
        self.number
    }

    fn on_pack(&mut self) {
        self.send_time_micros = utc_time_micros();
    }
}

pub fn push_test_messages(mailbox: &Mailbox<TestHeader>, numbers: impl IntoIterator<Item = u32>) {
    for number in numbers {
        mailbox.push(Message::new(TestHeader::new(number)))
            .expect("test message should fit");
    }
}

/// polls `condition` until it holds, panicking after `timeout`
pub fn wait_until(timeout: Duration, condition: impl FnMut() -> bool) {
    assert!(poll_until(timeout, condition), "condition not reached within {:?}", timeout);
}

/// polls `condition` until it holds or `timeout` elapses, returning whether it held
pub fn poll_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}

/// asserts that messages are numbered consecutively from `first`, and returns the average
///  interval between their send timestamps in microseconds
pub fn check_consecutive(messages: &[Message<TestHeader>], first: u32) -> u64 {
    let mut time_difference_sum_micros = 0;
    for (i, msg) in messages.iter().enumerate() {
        assert_eq!(msg.header().number, first + i as u32);
        assert_ne!(msg.header().send_time_micros, 0);
        if i > 0 {
            time_difference_sum_micros += msg.header().send_time_micros - messages[i - 1].header().send_time_micros;
        }
    }
    if messages.len() < 2 {
        0
    }
    else {
        time_difference_sum_micros / (messages.len() as u64 - 1)
    }
}
