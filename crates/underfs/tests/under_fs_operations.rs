//! Integration tests for the CubeFS under-filesystem facade.
//!
//! Every test runs against the in-memory store client, which records each
//! store call so tests can check how byte-level and metadata calls turn
//! into store round trips.
//!
//! Areas covered:
//! - write streams: chunking independence, empty flush, failure handling
//! - read streams: read-ahead reuse, seek, EOF
//! - listing: pagination and batched attribute resolution
//! - create: parent creation and atomic publication
//! - metadata: mkdirs, delete, rename, mode, status
//! - session lifecycle

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cfs_ufs::{
    BufferedReadStream, CreateOptions, CubeFsUnderFileSystem, DeleteOptions, MetadataRetryPolicy,
    MkdirsOptions, OpenOptions, ProcessIdentity, UfsError, UfsOptions, UfsOutputStream, UfsStatus,
};
use cfs_ufs_store::{
    CallCounts, Errno, FaultPlan, MemoryStoreClient, StoreClient, StoreError, StoreSession,
    StoreSettings,
};

fn settings() -> StoreSettings {
    StoreSettings::new("vol1", "10.0.0.1:17010", "ak", "sk")
}

/// Options with small buffers and no retry backoff.
fn small_options() -> UfsOptions {
    UfsOptions::default()
        .with_min_write_buffer_size(16)
        .with_write_buffer_size(16)
        .with_read_buffer_size(16)
        .with_metadata_retry(MetadataRetryPolicy::new(10, 0))
}

/// Helper to create a facade over a fresh in-memory store.
fn create_test_env(options: UfsOptions) -> (CubeFsUnderFileSystem, Arc<MemoryStoreClient>) {
    let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
    let client: Arc<dyn StoreClient> = store.clone();
    let session: Arc<StoreSession> = Arc::new(StoreSession::with_client(settings(), client));
    let ufs: CubeFsUnderFileSystem = CubeFsUnderFileSystem::new(session, options)
        .unwrap()
        .with_identity(ProcessIdentity::new("tester", "testers"));
    (ufs, store)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =============================================================================
// Write streams
// =============================================================================

mod write_stream {
    use super::*;

    #[test]
    fn test_chunking_does_not_change_store_writes() {
        let data: Vec<u8> = pattern(1000);
        let mut logs: Vec<Vec<(u64, usize)>> = Vec::new();

        for chunk in [1usize, 7, 16, 100, 1000] {
            let (ufs, store) = create_test_env(small_options());
            let mut out: UfsOutputStream = ufs.create("/f", CreateOptions::default()).unwrap();
            for piece in data.chunks(chunk) {
                out.write_bytes(piece).unwrap();
            }
            out.close().unwrap();

            assert_eq!(store.file_contents("/f").unwrap(), data, "chunk size {}", chunk);
            logs.push(store.calls().write_log);
        }

        let (ufs, store) = create_test_env(small_options());
        let mut out: UfsOutputStream = ufs.create("/f", CreateOptions::default()).unwrap();
        for byte in &data {
            out.write_byte(*byte).unwrap();
        }
        out.close().unwrap();
        logs.push(store.calls().write_log);

        let expected: Vec<(u64, usize)> = (0..62u64)
            .map(|i| (i * 16, 16))
            .chain(std::iter::once((992, 8)))
            .collect();
        for log in &logs {
            assert_eq!(log, &expected);
        }
    }

    #[test]
    fn test_flush_on_empty_buffer_issues_no_write() {
        let (ufs, store) = create_test_env(small_options());
        let mut out: UfsOutputStream = ufs.create("/f", CreateOptions::default()).unwrap();

        out.flush().unwrap();
        out.write_bytes(&pattern(16)).unwrap();
        out.flush().unwrap();

        let calls: CallCounts = store.calls();
        assert_eq!(calls.writes, 1);
        assert_eq!(calls.flushes, 2);
        out.close().unwrap();
    }

    #[test]
    fn test_minimum_write_buffer_applies() {
        let options: UfsOptions = UfsOptions::default()
            .with_write_buffer_size(8)
            .with_min_write_buffer_size(32);
        let (ufs, store) = create_test_env(options);

        let mut out: UfsOutputStream = ufs.create("/f", CreateOptions::default()).unwrap();
        out.write_bytes(&pattern(40)).unwrap();
        assert_eq!(store.calls().write_log, vec![(0, 32)]);
        out.close().unwrap();
    }

    #[test]
    fn test_short_write_is_fatal_and_not_retried() {
        let (ufs, store) = create_test_env(small_options());
        let mut out: UfsOutputStream = ufs.create("/f", CreateOptions::default()).unwrap();
        store.set_faults(FaultPlan {
            short_write: Some(5),
            ..Default::default()
        });

        let err: UfsError = out.write_bytes(&pattern(16)).unwrap_err();
        assert!(matches!(
            err,
            UfsError::ShortWrite {
                expected: 16,
                actual: 5,
                ..
            }
        ));
        let io_err: std::io::Error = err.into();
        assert_eq!(io_err.kind(), std::io::ErrorKind::WriteZero);

        let closed: UfsError = out.close().unwrap_err();
        assert!(matches!(closed, UfsError::StreamBroken { .. }));
        assert_eq!(store.calls().writes, 1);
        assert_eq!(store.open_descriptors(), 0);
    }

    #[test]
    fn test_close_failure_after_flush_failure_keeps_flush_error() {
        let (ufs, store) = create_test_env(small_options());
        let mut out: UfsOutputStream = ufs.create("/f", CreateOptions::default()).unwrap();
        out.write_bytes(b"abc").unwrap();
        store.set_faults(FaultPlan {
            flush_error: Some(Errno::EIO),
            close_error: Some(Errno::EIO),
            ..Default::default()
        });

        let err: UfsError = out.close().unwrap_err();
        let UfsError::CleanupFailed { primary, cleanup } = err else {
            panic!("expected a cleanup failure");
        };
        assert!(matches!(*primary, UfsError::FlushFailed { .. }));
        assert!(matches!(*cleanup, UfsError::CloseFailed { .. }));
    }

    #[test]
    fn test_double_close_and_write_after_close() {
        let (ufs, store) = create_test_env(small_options());
        let mut out: UfsOutputStream = ufs.create("/f", CreateOptions::default()).unwrap();

        out.close().unwrap();
        out.close().unwrap();
        assert_eq!(store.calls().closes, 1);
        assert!(matches!(
            out.write_byte(0).unwrap_err(),
            UfsError::StreamClosed { .. }
        ));
    }
}

// =============================================================================
// Read streams
// =============================================================================

mod read_stream {
    use super::*;

    #[test]
    fn test_read_round_trips_written_data() {
        let (ufs, _store) = create_test_env(small_options());
        let data: Vec<u8> = pattern(100);
        let mut out: UfsOutputStream = ufs.create("/f", CreateOptions::default()).unwrap();
        out.write_bytes(&data).unwrap();
        out.close().unwrap();

        let mut input: BufferedReadStream = ufs.open("/f", OpenOptions::default()).unwrap();
        let mut read: Vec<u8> = Vec::new();
        let mut buf: [u8; 10] = [0; 10];
        while let Some(n) = input.read(&mut buf).unwrap() {
            read.extend_from_slice(&buf[..n]);
        }
        assert_eq!(read, data);
        input.close().unwrap();
    }

    #[test]
    fn test_seek_to_current_position_does_not_refetch() {
        let (ufs, store) = create_test_env(small_options());
        store.put_file("/f", &pattern(64));
        let mut input: BufferedReadStream = ufs.open("/f", OpenOptions::default()).unwrap();

        input.read_byte().unwrap();
        store.reset_calls();
        for _ in 0..5 {
            let pos: u64 = input.pos();
            input.seek(pos).unwrap();
            input.read_byte().unwrap();
        }
        assert_eq!(store.calls().reads, 0);

        input.seek(40).unwrap();
        assert_eq!(input.read_byte().unwrap(), Some(40));
        assert_eq!(store.calls().read_log, vec![(40, 16)]);
    }

    #[test]
    fn test_eof_is_repeatable() {
        let (ufs, store) = create_test_env(small_options());
        store.put_file("/f", b"xy");
        let mut input: BufferedReadStream = ufs.open("/f", OpenOptions::default()).unwrap();

        let mut buf: [u8; 8] = [0; 8];
        assert_eq!(input.read(&mut buf).unwrap(), Some(2));
        for _ in 0..3 {
            assert_eq!(input.read(&mut buf).unwrap(), None);
            assert_eq!(input.read_byte().unwrap(), None);
        }
    }

    #[test]
    fn test_open_at_offset() {
        let (ufs, store) = create_test_env(small_options());
        store.put_file("/f", b"0123456789");

        let mut input: BufferedReadStream = ufs.open("/f", OpenOptions::at_offset(6)).unwrap();
        assert_eq!(input.pos(), 6);
        assert_eq!(input.read_byte().unwrap(), Some(b'6'));
    }

    #[test]
    fn test_open_missing_file() {
        let (ufs, _store) = create_test_env(small_options());
        let err: UfsError = ufs.open("/missing", OpenOptions::default()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_read_buffers_are_reused_across_streams() {
        let (ufs, store) = create_test_env(small_options());
        store.put_file("/f", b"data");

        for _ in 0..3 {
            let mut input: BufferedReadStream = ufs.open("/f", OpenOptions::default()).unwrap();
            input.read_byte().unwrap();
            input.close().unwrap();
        }
        assert_eq!(ufs.buffer_pool().allocation_count(), 1);
        assert_eq!(ufs.buffer_pool().hit_count(), 2);
        assert_eq!(store.open_descriptors(), 0);
    }
}

// =============================================================================
// Listing
// =============================================================================

mod listing {
    use super::*;

    #[test]
    fn test_listing_paginates_in_batches() {
        let (ufs, store) = create_test_env(UfsOptions::default());
        for i in 0..250 {
            store.put_file(&format!("/big/file{:03}", i), b"");
        }
        store.reset_calls();

        let listing: Vec<UfsStatus> = ufs.list_status("/big").unwrap();
        assert_eq!(listing.len(), 250);
        let names: HashSet<&str> = listing.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), 250);

        let calls: CallCounts = store.calls();
        assert_eq!(calls.readdir_sizes, vec![100, 100, 50]);
        assert_eq!(calls.batch_get_attrs, 3);
        assert_eq!(store.open_descriptors(), 0);
    }

    #[test]
    fn test_listing_a_file_is_empty() {
        let (ufs, store) = create_test_env(UfsOptions::default());
        store.put_file("/plain", b"abc");

        assert!(ufs.list_status("/plain").unwrap().is_empty());
    }

    #[test]
    fn test_listing_reports_child_paths_and_kinds() {
        let (ufs, store) = create_test_env(UfsOptions::default());
        store.put_file("/root/data.csv", b"1,2,3");
        store.put_dir("/root/nested");

        let listing: Vec<UfsStatus> = ufs.list_status("cubefs://vol1/root").unwrap();
        let file: &UfsStatus = listing.iter().find(|s| s.name() == "data.csv").unwrap();
        assert_eq!(file.path(), "/root/data.csv");
        assert_eq!(file.as_file().unwrap().length, 5);
        assert_eq!(file.owner(), "tester");

        let dir: &UfsStatus = listing.iter().find(|s| s.name() == "nested").unwrap();
        assert!(dir.is_directory());
        assert_eq!(dir.path(), "/root/nested");
    }

    #[test]
    fn test_listing_is_lazy() {
        let (ufs, store) = create_test_env(UfsOptions::default().with_list_batch_size(2));
        for i in 0..5 {
            store.put_file(&format!("/d/{}", i), b"");
        }
        store.reset_calls();

        let first: Vec<UfsStatus> = ufs
            .list_status_iter("/d")
            .unwrap()
            .take(2)
            .collect::<Result<Vec<UfsStatus>, UfsError>>()
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(store.calls().readdirs, 1);
        assert_eq!(store.open_descriptors(), 0);
    }
}

// =============================================================================
// Create
// =============================================================================

mod create {
    use super::*;

    #[test]
    fn test_create_with_missing_parents() {
        let (ufs, store) = create_test_env(small_options());

        let mut out: UfsOutputStream = ufs.create("/a/b/c", CreateOptions::default()).unwrap();
        assert_eq!(out.position(), 0);
        out.write_bytes(b"deep").unwrap();
        out.close().unwrap();

        assert!(ufs.is_directory("/a/b").unwrap());
        assert_eq!(store.file_contents("/a/b/c").unwrap(), b"deep");
    }

    #[test]
    fn test_create_uses_requested_mode() {
        let (ufs, _store) = create_test_env(small_options());
        let mut out: UfsOutputStream = ufs
            .create("/f", CreateOptions::default().with_mode(0o600))
            .unwrap();
        out.close().unwrap();

        assert_eq!(ufs.get_file_status("/f").unwrap().mode, 0o600);
    }

    #[test]
    fn test_atomic_create_publishes_on_close() {
        let (ufs, store) = create_test_env(small_options());
        store.put_file("/report", b"previous");

        let mut out: UfsOutputStream = ufs
            .create("/report", CreateOptions::default().atomic())
            .unwrap();
        assert!(out.is_atomic());
        out.write_bytes(b"fresh report").unwrap();
        assert_eq!(store.file_contents("/report").unwrap(), b"previous");

        out.close().unwrap();
        assert_eq!(store.file_contents("/report").unwrap(), b"fresh report");
        let names: Vec<String> = ufs
            .list_status("/")
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["report".to_string()]);
    }
}

// =============================================================================
// Metadata
// =============================================================================

mod metadata {
    use super::*;

    #[test]
    fn test_mkdirs() {
        let (ufs, _store) = create_test_env(small_options());

        assert!(ufs.mkdirs("/x/y/z", MkdirsOptions::default()).unwrap());
        assert!(ufs.is_directory("/x/y").unwrap());
        assert!(!ufs.mkdirs("/x/y/z", MkdirsOptions::default()).unwrap());
        assert!(!ufs
            .mkdirs("/p/q", MkdirsOptions::default().without_parents())
            .unwrap());
        assert!(!ufs.exists("/p").unwrap());
        assert!(ufs
            .mkdirs("/x/w", MkdirsOptions::default().without_parents().with_mode(0o700))
            .unwrap());
        assert_eq!(ufs.get_directory_status("/x/w").unwrap().mode, 0o700);
    }

    #[test]
    fn test_mkdirs_retries_transient_failures() {
        let (ufs, store) = create_test_env(small_options());
        store.set_faults(FaultPlan {
            failing_mkdirs: 3,
            ..Default::default()
        });

        assert!(ufs.mkdirs("/m", MkdirsOptions::default()).unwrap());
        assert_eq!(store.calls().mkdirs, 4);
    }

    #[test]
    fn test_delete_file_retries_then_gives_up() {
        let (ufs, store) = create_test_env(small_options());
        store.put_file("/f", b"");
        store.set_faults(FaultPlan {
            failing_unlinks: 2,
            ..Default::default()
        });
        assert!(ufs.delete_file("/f").unwrap());
        assert!(!ufs.exists("/f").unwrap());

        store.put_file("/g", b"");
        store.reset_calls();
        store.set_faults(FaultPlan {
            failing_unlinks: 50,
            ..Default::default()
        });
        assert!(!ufs.delete_file("/g").unwrap());
        assert_eq!(store.calls().unlinks, 10);
    }

    #[test]
    fn test_delete_missing_returns_false() {
        let (ufs, store) = create_test_env(small_options());
        assert!(!ufs.delete_file("/nope").unwrap());
        assert_eq!(store.calls().unlinks, 1);

        store.put_dir("/d");
        store.reset_calls();
        assert!(!ufs.delete_file("/d").unwrap());
        assert_eq!(store.calls().unlinks, 1);
        assert!(!ufs.delete_directory("/nope", DeleteOptions::recursive()).unwrap());
    }

    #[test]
    fn test_delete_directory() {
        let (ufs, store) = create_test_env(small_options());
        store.put_file("/t/a", b"");
        store.put_file("/t/sub/b", b"");
        store.put_dir("/empty");

        let err: UfsError = ufs
            .delete_directory("/t", DeleteOptions::default())
            .unwrap_err();
        assert!(matches!(err, UfsError::DirectoryNotEmpty { .. }));
        assert!(ufs.exists("/t/a").unwrap());

        assert!(ufs.delete_directory("/t", DeleteOptions::recursive()).unwrap());
        assert!(!ufs.exists("/t").unwrap());
        assert!(ufs.delete_directory("/empty", DeleteOptions::default()).unwrap());
        assert_eq!(store.open_descriptors(), 0);
    }

    #[test]
    fn test_rename() {
        let (ufs, store) = create_test_env(small_options());
        store.put_file("/src", b"1");
        store.put_dir("/dir");
        store.put_file("/taken", b"2");

        assert!(!ufs.rename_directory("/src", "/moved").unwrap());
        assert!(!ufs.rename_file("/src", "/taken").unwrap());
        assert!(ufs.rename_file("/src", "/moved").unwrap());
        assert_eq!(store.file_contents("/moved").unwrap(), b"1");

        assert!(!ufs.rename_file("/dir", "/dir2").unwrap());
        assert!(ufs.rename_directory("/dir", "/dir2").unwrap());
        assert!(ufs.is_directory("/dir2").unwrap());
    }

    #[test]
    fn test_set_mode_and_owner() {
        let (ufs, store) = create_test_env(small_options());
        store.put_file("/f", b"");

        ufs.set_mode("/f", 0o640).unwrap();
        assert_eq!(ufs.get_status("/f").unwrap().mode(), 0o640);
        assert!(ufs.is_file("/f").unwrap());
        ufs.set_owner("/f", Some("root"), None).unwrap();
        assert_eq!(store.open_descriptors(), 0);

        assert!(ufs.set_mode("/missing", 0o600).unwrap_err().is_not_found());
    }

    #[test]
    fn test_status_queries() {
        let (ufs, store) = create_test_env(small_options());
        store.put_file("/dir/file", b"hello");

        let file: UfsStatus = ufs.get_status("cubefs://vol1/dir/file").unwrap();
        assert!(file.is_file());
        assert_eq!(file.as_file().unwrap().block_size, 128 * 1024 * 1024);
        assert!(matches!(
            ufs.get_file_status("/dir").unwrap_err(),
            UfsError::IsDirectory { .. }
        ));
        assert!(ufs.get_directory_status("/dir/file").is_err());
        assert!(ufs.get_status("/nothing").unwrap_err().is_not_found());
        assert!(!ufs.is_file("/nothing").unwrap());
        assert!(!ufs.is_directory("/dir/file").unwrap());
    }

    #[test]
    fn test_capabilities() {
        let (ufs, _store) = create_test_env(UfsOptions::default().with_block_size(64 << 20));
        assert!(ufs.supports_flush());
        assert_eq!(ufs.under_fs_type(), "cubefs");
        assert_eq!(ufs.get_block_size_byte("/any"), 64 << 20);
    }
}

// =============================================================================
// Session lifecycle
// =============================================================================

mod session {
    use super::*;

    #[test]
    fn test_client_starts_lazily_once() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        let starts: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let connector_store: Arc<MemoryStoreClient> = store.clone();
        let connector_starts: Arc<AtomicUsize> = starts.clone();
        let session: StoreSession = StoreSession::new(
            settings(),
            move |_: &StoreSettings| -> Result<Arc<dyn StoreClient>, StoreError> {
                connector_starts.fetch_add(1, Ordering::SeqCst);
                let client: Arc<dyn StoreClient> = connector_store.clone();
                Ok(client)
            },
        )
        .unwrap();
        let ufs: CubeFsUnderFileSystem =
            CubeFsUnderFileSystem::new(Arc::new(session), small_options()).unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 0);

        ufs.mkdirs("/a", MkdirsOptions::default()).unwrap();
        ufs.exists("/a").unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_operations_fail_after_close() {
        let (ufs, store) = create_test_env(small_options());
        ufs.close();
        ufs.close();

        assert!(store.is_shut_down());
        let err: UfsError = ufs.exists("/").unwrap_err();
        assert!(matches!(err, UfsError::Session(StoreError::SessionClosed)));
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let store: Arc<MemoryStoreClient> = Arc::new(MemoryStoreClient::new());
        let client: Arc<dyn StoreClient> = store;
        let session: Arc<StoreSession> = Arc::new(StoreSession::with_client(settings(), client));

        let err: UfsError =
            CubeFsUnderFileSystem::new(session, UfsOptions::default().with_list_batch_size(0))
                .unwrap_err();
        assert!(matches!(err, UfsError::InvalidConfig { .. }));
    }
}
