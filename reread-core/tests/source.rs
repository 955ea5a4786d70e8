//! Collaborators: content hash, branch resolution, session ids.

use std::path::Path;

use reread_core::source::{
    content_hash, new_session_id, BranchResolver, FixedBranch, GitBranchResolver, UNKNOWN_BRANCH,
};

#[test]
fn content_hash_is_hex_sha256() {
    assert_eq!(
        content_hash(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_ne!(content_hash(b"abc\n"), content_hash(b"abc"), "every byte counts");
}

#[test]
fn git_branch_is_resolved_from_head() {
    let dir = tempfile::TempDir::new().unwrap();
    let repo = git2::Repository::init(dir.path()).unwrap();
    assert_eq!(
        GitBranchResolver.current_branch(dir.path()),
        UNKNOWN_BRANCH,
        "unborn HEAD has no branch yet"
    );

    let sig = git2::Signature::now("test", "test@example.com").unwrap();
    let tree_id = repo.index().unwrap().write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let commit_id = repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();
    let commit = repo.find_commit(commit_id).unwrap();
    repo.branch("feature", &commit, false).unwrap();
    repo.set_head("refs/heads/feature").unwrap();

    assert_eq!(GitBranchResolver.current_branch(dir.path()), "feature");

    repo.set_head_detached(commit_id).unwrap();
    let detached = GitBranchResolver.current_branch(dir.path());
    assert_eq!(detached, commit_id.to_string()[..12], "detached HEAD resolves to a short id");
}

#[test]
fn outside_a_repository_is_unknown() {
    let dir = tempfile::TempDir::new().unwrap();
    let nested = dir.path().join("not-a-repo");
    std::fs::create_dir(&nested).unwrap();
    // The temp dir itself may live inside some checkout; only a path that
    // does not exist is guaranteed to miss.
    let missing = nested.join("missing");
    assert_eq!(GitBranchResolver.current_branch(Path::new(&missing)), UNKNOWN_BRANCH);
}

#[test]
fn fixed_branch_and_session_ids() {
    assert_eq!(FixedBranch("release".into()).current_branch(Path::new(".")), "release");
    let a = new_session_id();
    let b = new_session_id();
    assert_eq!(a.len(), 36, "uuid text form");
    assert_ne!(a, b);
}
