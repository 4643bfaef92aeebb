fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use filebridge_protocol::{
        COMMAND_SIZE, Command, CompleteHeader, ErrorHeader, FrameCodec, HEADER_SIZE,
        RequestHeader, ResumeHeader,
    };
    use filebridge_transfer::{HashAlgorithm, ResumeRecord, hash};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (key order is irrelevant).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    fn codec() -> FrameCodec {
        FrameCodec::new(COMMAND_SIZE, HEADER_SIZE)
    }

    // --- Header documents ---

    #[test]
    fn fixture_request_header() {
        let header: RequestHeader = roundtrip_test("request_header.json");
        assert_eq!(header.file_name, "holiday.mp4");
        assert_eq!(header.file_size, 3_145_728);
    }

    #[test]
    fn fixture_resume_header() {
        let header: ResumeHeader = roundtrip_test("resume_header.json");
        assert_eq!(header.transferred_size, 1_048_576);
    }

    #[test]
    fn fixture_complete_header() {
        let header: CompleteHeader = roundtrip_test("complete_header.json");
        assert_eq!(header.file_hash.len(), 32);
    }

    #[test]
    fn fixture_error_header() {
        let header: ErrorHeader = roundtrip_test("error_header.json");
        assert!(header.error.starts_with("hash mismatch"));
    }

    #[test]
    fn headers_tolerate_missing_optional_keys() {
        let resume: ResumeHeader = serde_json::from_str(r#"{"file_name":"a.bin"}"#).unwrap();
        assert_eq!(resume.transferred_size, 0);

        let error: ErrorHeader = serde_json::from_str("{}").unwrap();
        assert_eq!(error.error, "unknown error");
    }

    // --- Resume sidecar ---

    #[test]
    fn fixture_resume_record() {
        let record: ResumeRecord = roundtrip_test("resume_record.json");
        assert_eq!(record.file_path, PathBuf::from("downloads/holiday.mp4"));
        assert!(record.is_resumable(3_145_728, 1_048_576));
        assert!(!record.is_resumable(3_145_729, 1_048_576));

        let at = record.recorded_at().unwrap();
        assert_eq!(at.timestamp(), 1_718_000_000);
        assert_eq!(at.timestamp_subsec_millis(), 250);
    }

    // --- Frame layout ---

    #[test]
    fn command_frames_are_space_padded() {
        let codec = codec();
        for command in Command::ALL {
            let frame = codec.encode_command(command).unwrap();
            assert_eq!(frame.len(), 64);
            let token = command.as_str().as_bytes();
            assert_eq!(&frame[..token.len()], token);
            assert!(frame[token.len()..].iter().all(|&b| b == b' '));
        }
    }

    #[test]
    fn header_frame_holds_fixture_json() {
        let codec = codec();
        let header: RequestHeader =
            serde_json::from_value(load_fixture("request_header.json")).unwrap();
        let frame = codec.encode_header(&header).unwrap();
        assert_eq!(frame.len(), 1024);

        let json_len = serde_json::to_vec(&header).unwrap().len();
        assert!(frame[json_len..].iter().all(|&b| b == b' '));
        let on_wire: serde_json::Value = serde_json::from_slice(&frame[..json_len]).unwrap();
        assert_eq!(on_wire, load_fixture("request_header.json"));
    }

    #[test]
    fn nul_padded_frames_decode() {
        let codec = codec();
        let mut frame = b"COMPLETE".to_vec();
        frame.resize(64, 0);
        assert_eq!(codec.decode_command(&frame), "COMPLETE");

        let mut header = br#"{"file_hash":"abc"}"#.to_vec();
        header.resize(1024, 0);
        let parsed: CompleteHeader = codec.decode_header(&header).unwrap();
        assert_eq!(parsed.file_hash, "abc");
    }

    #[tokio::test]
    async fn chunk_has_big_endian_length_prefix() {
        let codec = codec();
        let mut wire = Vec::new();
        codec.write_chunk(&mut wire, b"hello").await.unwrap();
        assert_eq!(&wire[..8], &[0, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(&wire[8..], b"hello");
    }

    #[tokio::test]
    async fn request_sequence_layout() {
        let codec = codec();
        let header: RequestHeader =
            serde_json::from_value(load_fixture("request_header.json")).unwrap();
        let mut wire = Vec::new();
        codec
            .write_command_with_header(&mut wire, Command::Request, &header)
            .await
            .unwrap();

        assert_eq!(wire.len(), 64 + 1024);
        assert_eq!(codec.decode_command(&wire[..64]), "REQUEST");
        let decoded: RequestHeader = codec.decode_header(&wire[64..]).unwrap();
        assert_eq!(decoded, header);
    }

    // --- Digests ---

    #[test]
    fn digests_match_reference_values() {
        let path = fixtures_dir().join("hello.txt");
        assert_eq!(
            hash::file_digest(&path, HashAlgorithm::Md5).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            hash::file_digest(&path, HashAlgorithm::Sha256).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
