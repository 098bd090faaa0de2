mod common;

use std::io::{Read, Write};

use common::{run_git, Scratch};
use gitfs::{Error, RepositorySession};

#[test]
fn round_trip() {
    let scratch = Scratch::new();
    let mut session = RepositorySession::builder(&scratch.root).open().unwrap();

    let mut f = session.open("foo", "w").unwrap();
    f.write_all(b"Hello\n").unwrap();
    f.close().unwrap();
    session.commit().unwrap();

    let mut f = session.open("foo", "r").unwrap();
    let mut buf = String::new();
    f.read_to_string(&mut buf).unwrap();
    assert_eq!(buf, "Hello\n");

    assert!(scratch.working_file_exists("foo"));
    assert_eq!(scratch.read_working_file("foo"), "Hello\n");
}

#[test]
fn in_transaction_visibility() {
    let scratch = Scratch::new();
    let mut session = RepositorySession::builder(&scratch.root).open().unwrap();

    let mut f = session.open("foo", "w").unwrap();
    f.write_all(b"Hello\n").unwrap();

    let err = session.open("foo", "r").unwrap_err();
    assert!(matches!(err, Error::NoSuchFileOrDirectory { .. }));

    f.close().unwrap();

    let mut reader = session.open("foo", "r").unwrap();
    let mut buf = String::new();
    reader.read_to_string(&mut buf).unwrap();
    assert_eq!(buf, "Hello\n");

    assert!(!scratch.working_file_exists("foo"));

    session.commit().unwrap();
    assert!(scratch.working_file_exists("foo"));
}

#[test]
fn modify_with_shadow() {
    let scratch = Scratch::new();
    let mut session = RepositorySession::builder(&scratch.root).open().unwrap();
    let mut f = session.open("foo", "w").unwrap();
    f.write_all(b"Howdy!\n").unwrap();
    f.close().unwrap();
    session.commit().unwrap();

    let mut f = session.open("foo", "w").unwrap();
    f.write_all(b"Hello!\n").unwrap();

    let mut reader = session.open("foo", "r").unwrap();
    let mut buf = String::new();
    reader.read_to_string(&mut buf).unwrap();
    assert_eq!(buf, "Howdy!\n");
    drop(reader);

    f.close().unwrap();

    let mut reader = session.open("foo", "r").unwrap();
    buf.clear();
    reader.read_to_string(&mut buf).unwrap();
    assert_eq!(buf, "Hello!\n");
    drop(reader);

    assert_eq!(scratch.read_working_file("foo"), "Howdy!\n");

    session.commit().unwrap();
    assert_eq!(scratch.read_working_file("foo"), "Hello!\n");
}

#[test]
fn commit_metadata() {
    let scratch = Scratch::new();
    let mut session = RepositorySession::builder(&scratch.root).open().unwrap();

    session.note("A test commit.");
    session.set_user("Fred Flintstone");
    session.set_extended_info("email", "fred@bed.rock");

    let mut f = session.open("foo", "w").unwrap();
    f.write_all(b"content\n").unwrap();
    f.close().unwrap();
    session.commit().unwrap();

    let log = scratch.git_log();
    assert!(log.contains("Author: Fred Flintstone <fred@bed.rock>"));
    assert!(log.contains("A test commit."));
}

#[test]
fn open_handle_blocks_commit() {
    let scratch = Scratch::new();
    let mut session = RepositorySession::builder(&scratch.root).open().unwrap();

    let mut f = session.open("bar", "w").unwrap();
    f.write_all(b"Howdy!\n").unwrap();

    let err = session.commit().unwrap_err();
    assert!(matches!(err, Error::OpenFileHandle));
}

#[test]
fn detached_head_rejected() {
    let scratch = Scratch::new();
    {
        let mut session = RepositorySession::builder(&scratch.root).open().unwrap();
        let mut f = session.open("foo", "w").unwrap();
        f.write_all(b"content\n").unwrap();
        f.close().unwrap();
        session.commit().unwrap();
    }

    let head = run_git(&scratch.root, &["rev-parse", "HEAD"]);
    run_git(&scratch.root, &["checkout", "--detach", "-q", head.trim()]);

    let err = RepositorySession::builder(&scratch.root)
        .create(false)
        .open()
        .unwrap_err();
    assert!(matches!(err, Error::DetachedHead));
}

#[test]
fn boundary_open_missing_file() {
    let scratch = Scratch::new();
    let session = RepositorySession::builder(&scratch.root).open().unwrap();
    let err = session.open("foo", "r").unwrap_err();
    match err {
        Error::NoSuchFileOrDirectory { filename } => assert_eq!(filename, "foo"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn boundary_open_missing_parent() {
    let scratch = Scratch::new();
    let session = RepositorySession::builder(&scratch.root).open().unwrap();
    let err = session.open("foo/bar", "w").unwrap_err();
    match err {
        Error::NoSuchFileOrDirectory { filename } => assert_eq!(filename, "foo/bar"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn boundary_open_root() {
    let scratch = Scratch::new();
    let session = RepositorySession::builder(&scratch.root).open().unwrap();
    let err = session.open(".", "r").unwrap_err();
    match err {
        Error::IsADirectory { filename } => assert_eq!(filename, ""),
        other => panic!("unexpected error: {other:?}"),
    }
    let err = session.open(".", "w").unwrap_err();
    assert!(matches!(err, Error::IsADirectory { .. }));
}

#[test]
fn boundary_open_write_on_directory() {
    let scratch = Scratch::new();
    let session = RepositorySession::builder(&scratch.root).open().unwrap();
    session.mkdir("foo").unwrap();
    let err = session.open("foo", "w").unwrap_err();
    match err {
        Error::IsADirectory { filename } => assert_eq!(filename, "foo"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn boundary_descend_through_file() {
    let scratch = Scratch::new();
    let session = RepositorySession::builder(&scratch.root).open().unwrap();
    let mut f = session.open("bar", "w").unwrap();
    f.write_all(b"x").unwrap();
    f.close().unwrap();

    let err = session.open("bar/foo", "w").unwrap_err();
    match err {
        Error::NotADirectory { filename } => assert_eq!(filename, "bar/foo"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn boundary_bad_mode() {
    let scratch = Scratch::new();
    let session = RepositorySession::builder(&scratch.root).open().unwrap();
    let err = session.open("foo", "wtf").unwrap_err();
    assert!(matches!(err, Error::BadMode(m) if m == "wtf"));
}

#[test]
fn boundary_mkdir_twice() {
    let scratch = Scratch::new();
    let session = RepositorySession::builder(&scratch.root).open().unwrap();
    session.mkdir("bar").unwrap();
    let err = session.mkdir("bar").unwrap_err();
    match err {
        Error::FileExists { filename } => assert_eq!(filename, "bar"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn abort_leaves_existence_unchanged() {
    let scratch = Scratch::new();
    let mut session = RepositorySession::builder(&scratch.root).open().unwrap();
    assert!(!session.exists("foo").unwrap());

    let mut f = session.open("foo", "w").unwrap();
    f.write_all(b"x").unwrap();
    f.close().unwrap();
    session.abort().unwrap();

    assert!(!session.exists("foo").unwrap());
}

#[test]
fn mkdir_visible_within_and_after_commit() {
    let scratch = Scratch::new();
    let mut session = RepositorySession::builder(&scratch.root).open().unwrap();
    session.mkdir("dir").unwrap();
    assert!(session.isdir("dir").unwrap());
    session.commit().unwrap();
    assert!(session.isdir("dir").unwrap());
}

#[test]
fn idempotent_commit_creates_no_new_commit() {
    let scratch = Scratch::new();
    let mut session = RepositorySession::builder(&scratch.root).open().unwrap();
    let mut f = session.open("foo", "w").unwrap();
    f.write_all(b"x").unwrap();
    f.close().unwrap();
    session.commit().unwrap();

    let before = run_git(&scratch.root, &["rev-parse", "HEAD"]);
    session.commit().unwrap();
    let after = run_git(&scratch.root, &["rev-parse", "HEAD"]);
    assert_eq!(before, after);
}

#[test]
fn bare_repository_skips_working_tree_update() {
    let scratch = Scratch::new();
    let mut session = RepositorySession::builder(&scratch.root)
        .bare(true)
        .open()
        .unwrap();
    let mut f = session.open("foo", "w").unwrap();
    f.write_all(b"content\n").unwrap();
    f.close().unwrap();
    session.commit().unwrap();

    assert!(!scratch.root.join("foo").exists());
    let mut reader = session.open("foo", "r").unwrap();
    let mut buf = String::new();
    reader.read_to_string(&mut buf).unwrap();
    assert_eq!(buf, "content\n");
}

#[test]
fn no_database_without_create() {
    let scratch = Scratch::new();
    let err = RepositorySession::builder(&scratch.root)
        .create(false)
        .open()
        .unwrap_err();
    assert!(matches!(err, Error::NoDatabase { .. }));
}
