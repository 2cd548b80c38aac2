//! Property tests for stream offsets and contents.

mod common;

use common::TestVolume;
use gfapi_client::{OpenMode, StreamReader, StreamWriter};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_chunked_writes_reassemble(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..12),
        cap in 0usize..64,
    ) {
        let vol = TestVolume::new();
        vol.seed("/f", b"");
        let conn = vol.connect();
        vol.backend.faults().max_write_chunk(cap);

        let mut fh = conn.open("/f", OpenMode::write_only()).unwrap();
        let mut expected = Vec::new();
        {
            let mut writer = StreamWriter::new(&mut fh);
            for chunk in &chunks {
                let before = writer.offset();
                prop_assert_eq!(writer.write_buffer(chunk).unwrap(), chunk.len());
                prop_assert_eq!(writer.offset(), before + chunk.len() as u64);
                expected.extend_from_slice(chunk);
            }
        }
        fh.close().unwrap();
        prop_assert_eq!(vol.contents("/f"), expected);
    }

    #[test]
    fn test_reads_are_monotonic_and_complete(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        lens in prop::collection::vec(0usize..300, 1..40),
    ) {
        let vol = TestVolume::new();
        vol.seed("/f", &data);
        let conn = vol.connect();
        let mut fh = conn.open("/f", OpenMode::read_only()).unwrap();

        let mut reader = StreamReader::new(&mut fh);
        let mut seen = Vec::new();
        let mut buf = vec![0u8; 300];
        for max_len in lens {
            let before = reader.offset();
            let n = reader.read_buffer(&mut buf, max_len).unwrap();
            prop_assert!(n <= max_len);
            prop_assert_eq!(reader.offset(), before + n as u64);
            seen.extend_from_slice(&buf[..n]);
        }
        let consumed = seen.len();
        prop_assert_eq!(&seen[..], &data[..consumed]);
    }

    #[test]
    fn test_failed_write_never_moves_offset(
        prefix in prop::collection::vec(any::<u8>(), 0..64),
        body in prop::collection::vec(any::<u8>(), 1..256),
        budget in 0u64..256,
        cap in 1usize..32,
    ) {
        let vol = TestVolume::new();
        vol.seed("/f", b"");
        let conn = vol.connect();
        let mut fh = conn.open("/f", OpenMode::write_only()).unwrap();
        let mut writer = StreamWriter::new(&mut fh);
        writer.write_buffer(&prefix).unwrap();

        vol.backend.faults().max_write_chunk(cap);
        vol.backend.faults().fail_writes_after(budget);
        let start = writer.offset();
        match writer.write_buffer(&body) {
            Ok(n) => {
                prop_assert!(budget >= body.len() as u64);
                prop_assert_eq!(writer.offset(), start + n as u64);
            }
            Err(_) => {
                prop_assert!(budget < body.len() as u64);
                prop_assert_eq!(writer.offset(), start);
            }
        }
    }
}
