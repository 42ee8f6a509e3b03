//! End-to-end tests of the VFS and the poll/commit/revert protocol,
//! driven through the engine harness.

use proptest::prelude::*;
use walrep_core::{Frame, VfsError};
use walrep_testkit::generators::frame_batch;
use walrep_testkit::{Cluster, Connection, EngineOptions, TEST_DB};

fn open(cluster: &Cluster, node: usize) -> Connection {
    Connection::open(&cluster.vfs(node), TEST_DB, EngineOptions::new()).unwrap()
}

/// Both copies of the WAL-index critical prefix must be byte-identical
/// after every successful operation.
fn assert_index_copies_match(conn: &Connection) {
    let bytes = conn.index_bytes().unwrap();
    assert_eq!(&bytes[..48], &bytes[48..96], "torn WAL-index header");
}

#[test]
fn open_and_close() {
    let cluster = Cluster::new(1);
    let conn = open(&cluster, 0);
    drop(conn);
}

/// Write transactions are not committed synchronously, so they are not
/// visible from other connections after the transaction ends.
#[test]
fn unreplicated_transaction_is_not_visible() {
    let cluster = Cluster::new(1);
    let mut writer = open(&cluster, 0);
    let mut reader = open(&cluster, 0);

    writer
        .write_transaction(&[(1, vec![1; 512]), (2, vec![2; 512])])
        .unwrap();

    assert_eq!(reader.read_page(1).unwrap(), None);
    assert_eq!(reader.read_page(2).unwrap(), None);
    assert_index_copies_match(&reader);
}

/// Poll after a write transaction returns the newly appended frames, in
/// write order: the first schema-creating transaction produces exactly
/// two frames, for pages 1 and 2.
#[test]
fn poll_after_write_transaction() {
    let cluster = Cluster::new(1);
    let vfs = cluster.vfs(0);
    let mut conn = open(&cluster, 0);

    conn.write_transaction(&[(1, vec![1; 512]), (2, vec![2; 512])])
        .unwrap();

    let frames = vfs.poll(TEST_DB).unwrap();
    assert_eq!(frames.len(), 2);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.page_number, i as u32 + 1);
    }
    assert_eq!(frames[0].data, vec![1; 512]);
    assert_eq!(frames[1].data, vec![2; 512]);

    // The buffer is cleared; a second poll returns nothing.
    assert!(vfs.poll(TEST_DB).unwrap().is_empty());
}

/// The write lock stays held from the end of the transaction through
/// poll, until commit or revert: a second writer fails fast with busy.
#[test]
fn pending_transaction_holds_write_lock() {
    let cluster = Cluster::new(1);
    let vfs = cluster.vfs(0);
    let mut writer = open(&cluster, 0);
    let mut second = open(&cluster, 0);

    writer.write_transaction(&[(1, vec![1; 512])]).unwrap();

    // Busy before poll...
    assert!(matches!(
        second.write_transaction(&[(1, vec![9; 512])]),
        Err(VfsError::Busy)
    ));

    let frames = vfs.poll(TEST_DB).unwrap();
    assert_eq!(frames.len(), 1);

    // ...and still busy after poll.
    assert!(matches!(
        second.write_transaction(&[(1, vec![9; 512])]),
        Err(VfsError::Busy)
    ));

    vfs.commit(TEST_DB, &frames).unwrap();

    // Commit released the lock.
    second.write_transaction(&[(2, vec![9; 512])]).unwrap();
}

/// Commit makes the polled frames visible to a read on the same
/// connection.
#[test]
fn commit_then_read() {
    let cluster = Cluster::new(1);
    let vfs = cluster.vfs(0);
    let mut conn = open(&cluster, 0);

    conn.write_transaction(&[(1, vec![0xAB; 512]), (2, vec![0xCD; 512])])
        .unwrap();
    let frames = vfs.poll(TEST_DB).unwrap();
    vfs.commit(TEST_DB, &frames).unwrap();

    assert_eq!(conn.read_page(1).unwrap(), Some(vec![0xAB; 512]));
    assert_eq!(conn.read_page(2).unwrap(), Some(vec![0xCD; 512]));
    assert_index_copies_match(&conn);
}

/// Two commits in a row: a later transaction's page contents win, and a
/// read sees all committed changes.
#[test]
fn commit_then_commit_again_then_read() {
    let cluster = Cluster::new(1);
    let vfs = cluster.vfs(0);
    let mut conn = open(&cluster, 0);

    conn.write_transaction(&[(1, vec![1; 512]), (2, vec![2; 512])])
        .unwrap();
    let first = vfs.poll(TEST_DB).unwrap();
    vfs.commit(TEST_DB, &first).unwrap();

    conn.write_transaction(&[(2, vec![123; 512]), (3, vec![3; 512])])
        .unwrap();
    let second = vfs.poll(TEST_DB).unwrap();
    vfs.commit(TEST_DB, &second).unwrap();

    assert_eq!(conn.read_page(1).unwrap(), Some(vec![1; 512]));
    assert_eq!(conn.read_page(2).unwrap(), Some(vec![123; 512]));
    assert_eq!(conn.read_page(3).unwrap(), Some(vec![3; 512]));
}

/// A read transaction started on a second connection sees the changes
/// committed by the first one.
#[test]
fn commit_then_read_on_new_connection() {
    let cluster = Cluster::new(1);
    let vfs = cluster.vfs(0);
    let mut writer = open(&cluster, 0);

    writer.write_transaction(&[(1, vec![7; 512])]).unwrap();
    let frames = vfs.poll(TEST_DB).unwrap();
    vfs.commit(TEST_DB, &frames).unwrap();

    let mut reader = open(&cluster, 0);
    assert_eq!(reader.read_page(1).unwrap(), Some(vec![7; 512]));
}

/// Closing every connection and reopening preserves committed data.
#[test]
fn commit_then_close_then_read_on_new_connection() {
    let cluster = Cluster::new(1);
    let vfs = cluster.vfs(0);

    {
        let mut conn = open(&cluster, 0);
        conn.write_transaction(&[(1, vec![42; 512])]).unwrap();
        let frames = vfs.poll(TEST_DB).unwrap();
        vfs.commit(TEST_DB, &frames).unwrap();
    }

    let mut conn = open(&cluster, 0);
    assert_eq!(conn.read_page(1).unwrap(), Some(vec![42; 512]));
    assert_index_copies_match(&conn);
}

/// Revert restores the WAL-index header to its pre-transaction state,
/// clears the buffer, and releases the write lock.
#[test]
fn revert_discards_pending_transaction() {
    let cluster = Cluster::new(1);
    let vfs = cluster.vfs(0);
    let mut conn = open(&cluster, 0);

    conn.write_transaction(&[(1, vec![1; 512])]).unwrap();
    let frames = vfs.poll(TEST_DB).unwrap();
    vfs.commit(TEST_DB, &frames).unwrap();

    let before = conn.index_bytes().unwrap();

    conn.write_transaction(&[(1, vec![0xEE; 512]), (2, vec![0xEE; 512])])
        .unwrap();
    vfs.revert(TEST_DB).unwrap();

    assert!(vfs.poll(TEST_DB).unwrap().is_empty());
    assert_eq!(conn.index_bytes().unwrap(), before);
    assert_eq!(conn.read_page(1).unwrap(), Some(vec![1; 512]));
    assert_eq!(conn.read_page(2).unwrap(), None);
}

/// Revert of a polled transaction also releases the write lock, and the
/// abandoned frame numbers are reused by the next transaction.
#[test]
fn revert_after_poll_then_rewrite() {
    let cluster = Cluster::new(1);
    let vfs = cluster.vfs(0);
    let mut conn = open(&cluster, 0);

    conn.write_transaction(&[(1, vec![1; 512])]).unwrap();
    let polled = vfs.poll(TEST_DB).unwrap();
    assert_eq!(polled.len(), 1);
    vfs.revert(TEST_DB).unwrap();

    conn.write_transaction(&[(1, vec![2; 512])]).unwrap();
    let frames = vfs.poll(TEST_DB).unwrap();
    assert_eq!(frames.len(), 1);
    vfs.commit(TEST_DB, &frames).unwrap();

    assert_eq!(conn.read_page(1).unwrap(), Some(vec![2; 512]));
}

/// Frames polled on one node and committed on another replicate the page
/// contents: the follower's engine recovers its index from the WAL the
/// commit wrote.
#[test]
fn leader_to_follower_replication() {
    let cluster = Cluster::new(2);
    let leader = cluster.vfs(0);
    let follower = cluster.vfs(1);

    let mut writer = Connection::open(&leader, TEST_DB, EngineOptions::new()).unwrap();
    writer
        .write_transaction(&[(1, vec![0x11; 512]), (2, vec![0x22; 512])])
        .unwrap();
    let frames = leader.poll(TEST_DB).unwrap();

    // The follower applies the batch without ever having run a local
    // write; its WAL starts a generation of its own.
    follower.open(TEST_DB).map(drop).unwrap();
    follower.commit(TEST_DB, &frames).unwrap();
    leader.commit(TEST_DB, &frames).unwrap();

    let mut replica_reader = Connection::open(&follower, TEST_DB, EngineOptions::new()).unwrap();
    assert_eq!(replica_reader.read_page(1).unwrap(), Some(vec![0x11; 512]));
    assert_eq!(replica_reader.read_page(2).unwrap(), Some(vec![0x22; 512]));

    // A second replicated batch chains onto the follower's WAL.
    writer.write_transaction(&[(2, vec![0x33; 512])]).unwrap();
    let frames = leader.poll(TEST_DB).unwrap();
    follower.commit(TEST_DB, &frames).unwrap();
    leader.commit(TEST_DB, &frames).unwrap();

    assert_eq!(replica_reader.read_page(2).unwrap(), Some(vec![0x33; 512]));
    assert_index_copies_match(&replica_reader);
}

/// Protocol misuse is rejected without corrupting state.
#[test]
fn protocol_misuse_is_rejected() {
    let cluster = Cluster::new(1);
    let vfs = cluster.vfs(0);
    let mut conn = open(&cluster, 0);

    // Revert with nothing pending.
    assert!(matches!(
        vfs.revert(TEST_DB),
        Err(VfsError::InvalidOperation { .. })
    ));

    // Empty commit batch.
    assert!(matches!(
        vfs.commit(TEST_DB, &[]),
        Err(VfsError::InvalidArgument { .. })
    ));

    conn.write_transaction(&[(1, vec![5; 512])]).unwrap();

    // Commit before the pending frames were polled.
    assert!(matches!(
        vfs.commit(
            TEST_DB,
            &[Frame {
                page_number: 1,
                data: vec![0; 512],
            }]
        ),
        Err(VfsError::InvalidOperation { .. })
    ));

    let frames = vfs.poll(TEST_DB).unwrap();

    // Mis-sized payload.
    let bad = vec![Frame {
        page_number: 1,
        data: vec![0; 256],
    }];
    assert!(matches!(
        vfs.commit(TEST_DB, &bad),
        Err(VfsError::InvalidArgument { .. })
    ));

    // The rejected calls changed nothing: the real batch still applies.
    vfs.commit(TEST_DB, &frames).unwrap();
    assert_eq!(conn.read_page(1).unwrap(), Some(vec![5; 512]));
}

/// An unknown database name is reported as such.
#[test]
fn unknown_database_is_rejected() {
    let cluster = Cluster::new(1);
    let vfs = cluster.vfs(0);
    assert!(matches!(
        vfs.poll("nope.db"),
        Err(VfsError::DatabaseNotFound { .. })
    ));
    assert!(matches!(
        vfs.commit(
            "nope.db",
            &[Frame {
                page_number: 1,
                data: vec![0; 512],
            }]
        ),
        Err(VfsError::DatabaseNotFound { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Applying the same polled batches through commit on a leader and a
    /// follower leaves both nodes with identical page contents.
    #[test]
    fn replicated_nodes_converge(batches in proptest::collection::vec(frame_batch(512, 3), 1..4)) {
        let cluster = Cluster::new(2);
        let leader = cluster.vfs(0);
        let follower = cluster.vfs(1);
        let mut writer = Connection::open(&leader, TEST_DB, EngineOptions::new()).unwrap();
        follower.open(TEST_DB).map(drop).unwrap();

        for batch in &batches {
            writer.write_transaction(batch).unwrap();
            let frames = leader.poll(TEST_DB).unwrap();
            prop_assert_eq!(frames.len(), batch.len());
            leader.commit(TEST_DB, &frames).unwrap();
            follower.commit(TEST_DB, &frames).unwrap();
        }

        let mut leader_reader = Connection::open(&leader, TEST_DB, EngineOptions::new()).unwrap();
        let mut follower_reader =
            Connection::open(&follower, TEST_DB, EngineOptions::new()).unwrap();
        for page in 1..=8u32 {
            prop_assert_eq!(
                leader_reader.read_page(page).unwrap(),
                follower_reader.read_page(page).unwrap()
            );
        }
    }
}
