// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers to set up groups in tests.
use crate::art::{Art, Member};
use crate::crypto::Crypto;
use crate::peer::LocalPeer;

/// Installs a `tracing` subscriber when `RUST_LOG` is set.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

pub fn generate_local_peers(crypto: &Crypto, count: usize) -> Vec<LocalPeer> {
    (0..count)
        .map(|_| LocalPeer::generate(crypto).unwrap())
        .collect()
}

/// Creates a group where the first member initiated the tree and all others joined from the
/// setup message.
pub fn reference_group(crypto: &Crypto, count: usize) -> Vec<Art> {
    group_of(crypto, generate_local_peers(crypto, count))
}

/// Creates a group of the given local peers, the first one being the initiator.
pub fn group_of(crypto: &Crypto, locals: Vec<LocalPeer>) -> Vec<Art> {
    let mut members = Vec::with_capacity(locals.len());
    members.push(Member::Local(locals[0].clone()));
    members.extend(locals[1..].iter().map(|local| Member::Remote(local.peer())));

    let initiator = Art::initiate(crypto, members).unwrap();
    let setup_message = initiator.setup_message().to_vec();

    let mut group = vec![initiator];
    for local in locals.into_iter().skip(1) {
        group.push(Art::from_setup_message(crypto, local, &setup_message).unwrap());
    }
    group
}

/// Panics if not all members arrived at the same stage key.
pub fn assert_converged(group: &[Art]) {
    let expected = group[0].stage_key();
    for (index, art) in group.iter().enumerate() {
        assert_eq!(
            art.stage_key(),
            expected,
            "member {index} has a different stage key"
        );
    }
}

/// Panics if secret keys are missing on the local path or present anywhere else.
pub fn assert_secret_confinement(art: &Art) {
    let tree = art.tree();
    let path = tree.path_of(&art.local_peer().peer());
    assert!(!path.is_empty(), "local peer is not in the tree");

    for id in tree.members() {
        let has_secret = tree.get(id).unwrap().secret_key().is_some();
        assert_eq!(
            has_secret,
            path.contains(&id),
            "secret key of node {} is misplaced",
            id.index()
        );
    }
}
