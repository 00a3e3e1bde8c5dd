use std::sync::Arc;
use tcp_rust_dumper::dumper::hex::hex_dump;
use tcp_rust_dumper::dumper::mysql::{
    CLIENT_CONNECT_WITH_DB, CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA, CLIENT_PROTOCOL_41,
    CLIENT_SECURE_CONNECTION, COM_QUERY,
};
use tcp_rust_dumper::dumper::{
    create_dumper, create_dumper_by_name, Direction, DumpValue, Dumper, DumperKind, DumperOptions,
};
use tracing::Span;

const PG_STARTUP: &[u8] = b"\x00\x00\x00\x22\x00\x03\x00\x00user\0alice\0database\0shop\0\0";
const PG_QUERY: &[u8] = b"Q\x00\x00\x00\x0eSELECT 1;\0";

fn mysql_packet(sequence_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = (payload.len() as u32).to_le_bytes()[..3].to_vec();
    buf.push(sequence_id);
    buf.extend_from_slice(payload);
    buf
}

fn mysql_handshake_response(username: &str, database: &str) -> Vec<u8> {
    let capabilities = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_CONNECT_WITH_DB;
    let mut payload = capabilities.to_le_bytes().to_vec();
    payload.extend_from_slice(&16_777_216u32.to_le_bytes());
    payload.push(0x21);
    payload.extend_from_slice(&[0u8; 23]);
    payload.extend_from_slice(username.as_bytes());
    payload.push(0);
    payload.push(20);
    payload.extend_from_slice(&[0x5a; 20]);
    payload.extend_from_slice(database.as_bytes());
    payload.push(0);
    mysql_packet(1, &payload)
}

fn mysql_query(sql: &str) -> Vec<u8> {
    let mut payload = vec![COM_QUERY];
    payload.extend_from_slice(sql.as_bytes());
    mysql_packet(0, &payload)
}

fn all_dumpers() -> Vec<Arc<dyn Dumper>> {
    DumperKind::all()
        .iter()
        .map(|kind| create_dumper(*kind, &DumperOptions::default(), Span::none()))
        .collect()
}

/// Small xorshift generator so failures reproduce without a seed file.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.next() as u8).collect()
    }
}

#[test]
fn test_pg_end_to_end() {
    let dumper = create_dumper_by_name("postgresql", &DumperOptions::default(), Span::none())
        .expect("postgresql is an alias of pg");

    assert_eq!(
        dumper.read_persistent_values(PG_STARTUP),
        vec![
            DumpValue::new("username", "alice"),
            DumpValue::new("database", "shop"),
        ]
    );
    assert!(dumper.read(PG_STARTUP).is_empty());

    assert_eq!(
        dumper.read(PG_QUERY),
        vec![
            DumpValue::new("query", "SELECT 1;"),
            DumpValue::new("message_type", "Q"),
        ]
    );
    assert!(dumper.read_persistent_values(PG_QUERY).is_empty());
}

#[test]
fn test_mysql_end_to_end() {
    let dumper = create_dumper(DumperKind::Mysql, &DumperOptions::default(), Span::none());

    let handshake = mysql_handshake_response("root", "test");
    assert_eq!(
        dumper.read_persistent_values(&handshake),
        vec![
            DumpValue::new("username", "root"),
            DumpValue::new("database", "test"),
        ]
    );
    assert!(dumper.read(&handshake).is_empty());

    let query = mysql_query("SELECT 1");
    assert_eq!(
        dumper.read(&query),
        vec![
            DumpValue::new("query", "SELECT 1"),
            DumpValue::new("message_type", "COM_QUERY"),
        ]
    );
    assert!(dumper.read_persistent_values(&query).is_empty());
}

#[test]
fn test_hex_dumps_everything() {
    let dumper = create_dumper(DumperKind::Hex, &DumperOptions::default(), Span::none());
    let values = dumper.read(b"0123456789abcdef!");

    assert_eq!(values.len(), 1);
    assert_eq!(values[0].key, "hex");
    let lines: Vec<&str> = values[0].value.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("00000000  30 31 32 33"));
    assert!(lines[0].ends_with("|0123456789abcdef|"));
    assert!(lines[1].starts_with("00000010  21"));

    assert!(dumper.read_persistent_values(PG_STARTUP).is_empty());
    assert!(dumper.dumps_direction(Direction::RemoteToClient));
}

#[test]
fn test_protocol_dumpers_skip_server_traffic() {
    for dumper in all_dumpers() {
        let expected = dumper.name() == "hex";
        assert_eq!(dumper.dumps_direction(Direction::RemoteToClient), expected);
        assert_eq!(dumper.dumps_direction(Direction::DstToSrc), expected);
        assert!(dumper.dumps_direction(Direction::ClientToRemote));
        assert!(dumper.dumps_direction(Direction::SrcToDst));
    }
}

#[test]
fn test_empty_and_random_input_never_panics() {
    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
    let dumpers = all_dumpers();

    for dumper in &dumpers {
        assert!(dumper.read_persistent_values(&[]).is_empty());
        if dumper.name() != "hex" {
            assert!(dumper.read(&[]).is_empty());
        }
    }

    for _ in 0..2_000 {
        let len = (rng.next() % 96) as usize;
        let buf = rng.bytes(len);
        for dumper in &dumpers {
            let persistent = dumper.read_persistent_values(&buf);
            let values = dumper.read(&buf);
            if dumper.name() == "hex" {
                assert!(persistent.is_empty());
                assert_eq!(values, vec![DumpValue::new("hex", hex_dump(&buf))]);
            }
        }
    }
}

#[test]
fn test_corrupted_valid_messages_never_panic() {
    let mut rng = XorShift(42);
    let dumpers = all_dumpers();
    let seeds = [
        PG_STARTUP.to_vec(),
        PG_QUERY.to_vec(),
        mysql_handshake_response("root", "test"),
        mysql_query("SELECT 1"),
    ];

    for seed in &seeds {
        // Every prefix
        for end in 0..=seed.len() {
            for dumper in &dumpers {
                let _ = dumper.read_persistent_values(&seed[..end]);
                let _ = dumper.read(&seed[..end]);
            }
        }
        // Single-byte corruption
        for _ in 0..500 {
            let mut buf = seed.clone();
            let idx = (rng.next() as usize) % buf.len();
            buf[idx] = rng.next() as u8;
            for dumper in &dumpers {
                let _ = dumper.read_persistent_values(&buf);
                let _ = dumper.read(&buf);
            }
        }
    }
}

#[test]
fn test_shared_dumper_matches_per_connection_instances() {
    let inputs: Vec<Vec<u8>> = vec![
        PG_STARTUP.to_vec(),
        PG_QUERY.to_vec(),
        mysql_handshake_response("app", "orders"),
        mysql_query("UPDATE t SET a = 1"),
        b"\x00\x00\x00\x08\x04\xd2\x16\x2f".to_vec(),
    ];

    for kind in DumperKind::all() {
        let shared = create_dumper(*kind, &DumperOptions::default(), Span::none());
        let expected: Vec<_> = inputs
            .iter()
            .map(|buf| (shared.read_persistent_values(buf), shared.read(buf)))
            .collect();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let shared = shared.clone();
                let inputs = &inputs;
                let expected = &expected;
                scope.spawn(move || {
                    let own = create_dumper(*kind, &DumperOptions::default(), Span::none());
                    for _ in 0..100 {
                        for (buf, want) in inputs.iter().zip(expected) {
                            let got = (shared.read_persistent_values(buf), shared.read(buf));
                            assert_eq!(&got, want);
                            let own_got = (own.read_persistent_values(buf), own.read(buf));
                            assert_eq!(&own_got, want);
                        }
                    }
                });
            }
        });
    }
}

#[test]
fn test_calls_are_idempotent() {
    for dumper in all_dumpers() {
        for buf in [PG_STARTUP, PG_QUERY] {
            assert_eq!(
                dumper.read_persistent_values(buf),
                dumper.read_persistent_values(buf)
            );
            assert_eq!(dumper.read(buf), dumper.read(buf));
        }
    }
}

#[test]
fn test_extra_persistent_keys_from_options() {
    let options = DumperOptions {
        extra_persistent_keys: vec!["application_name".to_string()],
    };
    let dumper = create_dumper(DumperKind::Pg, &options, Span::none());

    let startup = b"\x00\x00\x00\x28\x00\x03\x00\x00user\0bob\0application_name\0psql\0\0";
    assert_eq!(
        dumper.read_persistent_values(startup),
        vec![
            DumpValue::new("username", "bob"),
            DumpValue::new("application_name", "psql"),
        ]
    );
}

#[test]
fn test_unknown_dumper_name() {
    let err = create_dumper_by_name("redis", &DumperOptions::default(), Span::none())
        .err()
        .expect("redis is not a dumper");
    let message = err.to_string();
    assert!(message.contains("redis"));
    for name in ["pg", "mysql", "hex"] {
        assert!(message.contains(name));
    }
}
