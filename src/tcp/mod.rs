//! TCP transports: a session that accepts one peer and receives from it, and a client that
//!  connects and sends.

pub mod client;
pub mod session;

pub use client::{client_transport, TcpClient};
pub use session::session_transport;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use rstest::*;
    use crate::config::{MailboxConfig, SendConfig};
    use crate::endpoint::Endpoint;
    use crate::mailbox::Mailbox;
    use crate::message::{Message, StandardHeader};
    use crate::reactor::Reactor;
    use crate::tcp::{session_transport, TcpClient};
    use crate::test_util::{check_consecutive, push_test_messages, wait_until, TestHeader};
    use crate::transport::{TransportHandle, TransportState};

    #[rstest]
    #[case::single(1)]
    #[case::few(10)]
    #[case::many(10_000)]
    fn test_ordered_delivery(#[case] num_messages: u32) {
        let reactor = Reactor::new("test-receiver").unwrap();
        let receive_mailbox = Arc::new(Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap());
        let session = session_transport(receive_mailbox.clone(), Endpoint::loopback(0), Default::default(), reactor.handle()).unwrap();
        session.start_receive().unwrap();
        reactor.run().unwrap();

        let send_mailbox = Arc::new(Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap());
        let remote = session.socket().local_endpoint().unwrap();
        let client = TcpClient::connect(send_mailbox.clone(), remote, 1_000_000, SendConfig::default()).unwrap();
        push_test_messages(&send_mailbox, 0..num_messages);

        wait_until(Duration::from_secs(30), || receive_mailbox.receive_queue_count() == num_messages);
        let received = receive_mailbox.retrieve_all();
        assert_eq!(received.len(), num_messages as usize);
        check_consecutive(&received, 0);
        assert_eq!(send_mailbox.send_queue_count(), 0);

        assert_eq!(session.socket().connection_info(), vec![format!("Connection: {}", client.local_endpoint().unwrap())]);
    }

    #[test]
    fn test_bodies_arrive_intact() {
        let reactor = Reactor::new("test-receiver").unwrap();
        let receive_mailbox = Arc::new(Mailbox::<StandardHeader>::new(MailboxConfig::default()).unwrap());
        let session = session_transport(receive_mailbox.clone(), Endpoint::loopback(0), Default::default(), reactor.handle()).unwrap();
        session.start_receive().unwrap();
        reactor.run().unwrap();

        let send_mailbox = Arc::new(Mailbox::<StandardHeader>::new(MailboxConfig::default()).unwrap());
        let _client = TcpClient::connect(send_mailbox.clone(), session.socket().local_endpoint().unwrap(), 1_000_000, SendConfig::default()).unwrap();

        let body_sizes = [0usize, 1, 100, 1364, 7];
        for (i, size) in body_sizes.iter().enumerate() {
            let header = StandardHeader { sequence_number: i as u32, sender_id: 42, ..StandardHeader::default() };
            send_mailbox.push(Message::with_body(header, vec![i as u8 + 1; *size]).unwrap()).unwrap();
        }

        wait_until(Duration::from_secs(10), || receive_mailbox.receive_queue_count() == body_sizes.len() as u32);
        for (i, size) in body_sizes.iter().enumerate() {
            let message = receive_mailbox.retrieve().unwrap();
            assert_eq!(message.header().sequence_number, i as u32);
            assert_eq!(message.header().sender_id, 42);
            assert_eq!(message.body().len(), *size);
            assert!(message.body().iter().all(|b| *b == i as u8 + 1));
        }
    }

    #[test]
    fn test_client_disconnect_stops_session() {
        let reactor = Reactor::new("test-receiver").unwrap();
        let receive_mailbox = Arc::new(Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap());
        let session = session_transport(receive_mailbox.clone(), Endpoint::loopback(0), Default::default(), reactor.handle()).unwrap();
        session.start_receive().unwrap();
        reactor.run().unwrap();

        let send_mailbox = Arc::new(Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap());
        let client = TcpClient::connect(send_mailbox.clone(), session.socket().local_endpoint().unwrap(), 1_000_000, SendConfig::default()).unwrap();
        push_test_messages(&send_mailbox, 0..3);
        wait_until(Duration::from_secs(10), || receive_mailbox.receive_queue_count() == 3);

        client.shutdown();
        wait_until(Duration::from_secs(10), || session.receive_state() == TransportState::Stopped);
        assert_eq!(client.transport().send_state(), TransportState::Stopped);
    }

    #[test]
    fn test_paced_sending() {
        let reactor = Reactor::new("test-receiver").unwrap();
        let receive_mailbox = Arc::new(Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap());
        let session = session_transport(receive_mailbox.clone(), Endpoint::loopback(0), Default::default(), reactor.handle()).unwrap();
        session.start_receive().unwrap();
        reactor.run().unwrap();

        let send_mailbox = Arc::new(Mailbox::<TestHeader>::new(MailboxConfig::default()).unwrap());
        let _client = TcpClient::connect(send_mailbox.clone(), session.socket().local_endpoint().unwrap(), 1_000_000, SendConfig::steady(10_000)).unwrap();
        push_test_messages(&send_mailbox, 0..10);

        wait_until(Duration::from_secs(10), || receive_mailbox.receive_queue_count() == 10);
        let average_interval_micros = check_consecutive(&receive_mailbox.retrieve_all(), 0);
        // pacing never sends early; lateness depends on how busy the machine is
        assert!((9_900..=15_000).contains(&average_interval_micros), "{}", average_interval_micros);
    }
}
