//! Property tests for payload decoding.

use proptest::prelude::*;
use sshgate_wire::open::{DirectTcpIp, ForwardedTcpIp};
use sshgate_wire::request::{EnvRequest, ExecRequest, ExitSignal, PtyRequest, WindowChange};
use sshgate_wire::{DecodeError, Payload};

proptest! {
    #[test]
    fn arbitrary_input_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = EnvRequest::decode(&data);
        let _ = PtyRequest::decode(&data);
        let _ = ExecRequest::decode(&data);
        let _ = WindowChange::decode(&data);
        let _ = ExitSignal::decode(&data);
        let _ = ForwardedTcpIp::decode(&data);
        let _ = DirectTcpIp::decode(&data);
    }

    #[test]
    fn env_survives_encoding(name in "[A-Z_]{1,16}", value in "\\PC{0,32}") {
        let env = EnvRequest { name, value };
        prop_assert_eq!(EnvRequest::decode(&env.to_bytes()).unwrap(), env);
    }

    #[test]
    fn every_strict_prefix_is_truncated(cols in any::<u32>(), rows in any::<u32>()) {
        let bytes = WindowChange { columns: cols, rows, width: 0, height: 0 }.to_bytes();
        for len in 0..bytes.len() {
            let err = WindowChange::decode(&bytes[..len]).unwrap_err();
            prop_assert!(err.is_truncated());
        }
    }

    #[test]
    fn appended_bytes_are_rejected(extra in proptest::collection::vec(any::<u8>(), 1..8)) {
        let mut bytes = ExecRequest { exec: "ls".into() }.to_bytes().to_vec();
        bytes.extend_from_slice(&extra);
        prop_assert_eq!(
            ExecRequest::decode(&bytes).unwrap_err(),
            DecodeError::TrailingBytes { count: extra.len() }
        );
    }
}

#[test]
fn pty_request_from_openssh_client() {
    // pty-req as OpenSSH sends it: TERM=xterm-256color, 80x24, VINTR and TTY_OP_ISPEED.
    let mut data = vec![0, 0, 0, 14];
    data.extend_from_slice(b"xterm-256color");
    data.extend_from_slice(&[0, 0, 0, 80, 0, 0, 0, 24, 0, 0, 0, 0, 0, 0, 0, 0]);
    data.extend_from_slice(&[0, 0, 0, 11, 1, 0, 0, 0, 3, 128, 0, 0, 150, 0, 0]);

    let pty = PtyRequest::decode(&data).unwrap();
    assert_eq!(pty.term, "xterm-256color");
    assert_eq!((pty.columns, pty.rows), (80, 24));
    assert_eq!(pty.modes().unwrap(), vec![(1, 3), (128, 38400)]);
}
