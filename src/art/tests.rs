// SPDX-License-Identifier: MIT OR Apache-2.0

use proptest::prelude::*;
use rstest::rstest;

use crate::codec::{KeyUpdateMessage, SplitMessage};
use crate::crypto::Crypto;
use crate::error::ArtError;
use crate::key_pair::{KeyPair, PublicKey};
use crate::peer::LocalPeer;
use crate::test_utils::{
    assert_converged, assert_secret_confinement, generate_local_peers, group_of, reference_group,
    setup_logging,
};
use crate::traits::CryptoProvider;

use super::{Art, Member};

fn flip_bit(bytes: &[u8], index: usize) -> Vec<u8> {
    let mut flipped = bytes.to_vec();
    flipped[index] ^= 0b0000_0001;
    flipped
}

/// Applies a key update of one member to everyone else in the group.
fn ratchet(crypto: &Crypto, group: &mut [Art], updater: usize) {
    let message = group[updater].update_key(crypto, None).unwrap();
    for (index, art) in group.iter_mut().enumerate() {
        if index != updater {
            art.process_key_update(crypto, &message).unwrap();
        }
    }
}

#[rstest]
#[case(2)]
#[case(3)]
#[case(4)]
#[case(5)]
#[case(8)]
#[case(13)]
fn all_members_agree_on_stage_key(#[case] members: usize) {
    setup_logging();

    let crypto = Crypto::from_seed([1; 32]);
    let group = reference_group(&crypto, members);

    assert_converged(&group);
    let root_key = group[0].tree().public_key(group[0].tree().root()).unwrap();
    for art in &group {
        assert_eq!(art.leaves().len(), members);
        assert_eq!(art.tree().public_key(art.tree().root()).unwrap(), root_key);
        assert_secret_confinement(art);
    }

    assert!(group[0].is_initiator());
    assert!(group[1..].iter().all(|art| !art.is_initiator()));
}

#[test]
fn setup_of_three_members() {
    let crypto = Crypto::from_seed([2; 32]);
    let group = reference_group(&crypto, 3);
    assert_converged(&group);

    // Everyone knows who created the tree.
    let initiator_identity = &group[0].local_peer().identity().public_key;
    for art in &group {
        assert_eq!(
            art.initiator().unwrap().peer().identity_key(),
            initiator_identity
        );
        assert_eq!(art.setup_message(), group[0].setup_message());
    }

    // Non-initiators got a blinded leaf key instead of their ephemeral key.
    assert_ne!(
        group[1].leaf().unwrap().public_key(),
        &group[1].local_peer().ephemeral().public_key
    );
    assert_eq!(
        group[0].leaf().unwrap().public_key(),
        &group[0].local_peer().ephemeral().public_key
    );
}

#[test]
fn ratchet_key_update() {
    let crypto = Crypto::from_seed([3; 32]);
    let mut group = reference_group(&crypto, 3);
    let before = group[0].stage_key().clone();

    let message = group[1].update_key(&crypto, None).unwrap();
    // Three (old key, new key) pairs and two signatures.
    assert_eq!(message.len(), 6 * 32 + 2 * 64);

    group[0].process_key_update(&crypto, &message).unwrap();
    group[2].process_key_update(&crypto, &message).unwrap();

    assert_converged(&group);
    assert_ne!(group[0].stage_key(), &before);

    // The updated leaf carries the new ephemeral key of the member.
    let new_ephemeral = &group[1].local_peer().ephemeral().public_key;
    assert_eq!(group[1].leaf().unwrap().public_key(), new_ephemeral);
    for art in &group {
        assert!(art.leaf_of(new_ephemeral).is_some());
        assert_secret_confinement(art);
    }
}

#[test]
fn ratchet_with_given_key_pair() {
    let crypto = Crypto::from_seed([4; 32]);
    let mut group = reference_group(&crypto, 2);
    let ephemeral = KeyPair::generate(&crypto).unwrap();

    let message = group[0]
        .update_key(&crypto, Some(ephemeral.clone()))
        .unwrap();
    group[1].process_key_update(&crypto, &message).unwrap();

    assert_converged(&group);
    assert_eq!(group[0].local_peer().ephemeral(), &ephemeral);
    assert_eq!(
        group[1].initiator().unwrap().peer().ephemeral_key(),
        &ephemeral.public_key
    );
}

#[test]
fn add_member_with_new_identity() {
    let crypto = Crypto::from_seed([5; 32]);
    let mut group = reference_group(&crypto, 3);
    let new_member = LocalPeer::generate(&crypto).unwrap();

    let at = group[1].leaf().unwrap().public_key().clone();
    let output = group[0]
        .split(&crypto, &new_member.peer(), Some(&at))
        .unwrap();

    group[1].process_split(&crypto, &output.message).unwrap();
    group[2].process_split(&crypto, &output.message).unwrap();
    let joined =
        Art::from_split_message(&crypto, new_member, &output.snapshot, &output.message).unwrap();
    group.push(joined);

    assert_converged(&group);
    for art in &group {
        assert_eq!(art.leaves().len(), 4);
        assert_secret_confinement(art);
    }

    // New leaf sits next to the one it was split from.
    let peers = group[0].peers();
    assert!(group[1].local_peer().is(peers[1]));
    assert!(group[3].local_peer().is(peers[2]));
    assert!(!group[3].is_initiator());

    // Everyone keeps ratcheting afterwards, including the new member.
    ratchet(&crypto, &mut group, 3);
    ratchet(&crypto, &mut group, 2);
    assert_converged(&group);
}

#[test]
fn add_member_next_to_initiator() {
    let crypto = Crypto::from_seed([6; 32]);
    let mut group = reference_group(&crypto, 2);
    let new_member = LocalPeer::generate(&crypto).unwrap();

    let output = group[0].split(&crypto, &new_member.peer(), None).unwrap();
    group[1].process_split(&crypto, &output.message).unwrap();
    group.push(
        Art::from_split_message(&crypto, new_member, &output.snapshot, &output.message).unwrap(),
    );

    assert_converged(&group);
    let peers = group[2].peers();
    assert!(group[0].local_peer().is(peers[0]));
    assert!(group[2].local_peer().is(peers[1]));
    assert!(group[1].local_peer().is(peers[2]));
}

#[test]
fn add_own_device() {
    let crypto = Crypto::from_seed([7; 32]);
    let mut group = reference_group(&crypto, 3);
    let second_device = group[1].local_peer().new_device(&crypto).unwrap();

    // The given leaf is ignored when adding our own device.
    let at = group[2].leaf().unwrap().public_key().clone();
    let output = group[1]
        .split(&crypto, &second_device.peer(), Some(&at))
        .unwrap();

    group[0].process_split(&crypto, &output.message).unwrap();
    group[2].process_split(&crypto, &output.message).unwrap();
    group.push(
        Art::from_split_message(&crypto, second_device, &output.snapshot, &output.message)
            .unwrap(),
    );

    assert_converged(&group);
    let peers = group[0].peers();
    assert!(group[1].local_peer().is(peers[1]));
    assert!(group[3].local_peer().is(peers[2]));
    assert_eq!(peers[1].identity_key(), peers[2].identity_key());

    // The new device can ratchet and the others follow.
    ratchet(&crypto, &mut group, 3);
    assert_converged(&group);
    for art in &group {
        assert_secret_confinement(art);
    }

    // And the device can add yet another device of the same identity.
    let third_device = group[3].local_peer().new_device(&crypto).unwrap();
    let output = group[3].split(&crypto, &third_device.peer(), None).unwrap();
    for art in &mut group[..3] {
        art.process_split(&crypto, &output.message).unwrap();
    }
    group.push(
        Art::from_split_message(&crypto, third_device, &output.snapshot, &output.message)
            .unwrap(),
    );
    assert_converged(&group);
}

#[test]
fn only_initiator_adds_new_identities() {
    let crypto = Crypto::from_seed([8; 32]);
    let mut group = reference_group(&crypto, 3);
    let new_member = LocalPeer::generate(&crypto).unwrap();
    let before = group[2].stage_key().clone();

    assert!(matches!(
        group[2].split(&crypto, &new_member.peer(), None),
        Err(ArtError::InvalidArgument(_))
    ));
    assert_eq!(group[2].stage_key(), &before);
}

#[test]
fn reject_adding_existing_members() {
    let crypto = Crypto::from_seed([9; 32]);
    let mut group = reference_group(&crypto, 3);

    // Same peer again.
    let existing = group[1].local_peer().peer();
    assert!(matches!(
        group[0].split(&crypto, &existing, None),
        Err(ArtError::InvalidArgument(_))
    ));

    // Another device of an identity can only be added by that identity.
    let other_device = group[1].local_peer().new_device(&crypto).unwrap();
    assert!(matches!(
        group[0].split(&crypto, &other_device.peer(), None),
        Err(ArtError::InvalidArgument(_))
    ));

    // Unknown leaf to split at.
    let new_member = LocalPeer::generate(&crypto).unwrap();
    assert!(matches!(
        group[0].split(
            &crypto,
            &new_member.peer(),
            Some(&PublicKey::from_bytes(vec![1; 32]))
        ),
        Err(ArtError::InvalidArgument(_))
    ));
}

#[test]
fn reject_forged_splitter() {
    let crypto = Crypto::from_seed([10; 32]);
    let mut group = reference_group(&crypto, 3);
    let new_member = LocalPeer::generate(&crypto).unwrap();
    let prior_stage = group[0].stage_key().clone();

    let at = group[2].leaf().unwrap().public_key().clone();
    let output = group[0]
        .split(&crypto, &new_member.peer(), Some(&at))
        .unwrap();
    let valid = SplitMessage::decode::<Crypto>(&output.message).unwrap();

    // A non-initiator member knows the stage key and re-signs the split with their own ephemeral
    // key.
    let forged = SplitMessage::encode(
        &crypto,
        &valid.at,
        &new_member.peer(),
        &valid.path_keys,
        &group[2].local_peer().ephemeral().secret_key,
        &prior_stage.secret_key,
    )
    .unwrap();

    let before = group[1].clone();
    assert!(matches!(
        group[1].process_split(&crypto, &forged),
        Err(ArtError::InvalidSignature(_))
    ));
    assert_eq!(group[1].tree(), before.tree());
    assert_eq!(group[1].stage_key(), before.stage_key());

    assert!(matches!(
        Art::from_split_message(&crypto, new_member, &output.snapshot, &forged),
        Err(ArtError::InvalidSignature(_))
    ));
}

#[test]
fn split_message_for_another_peer() {
    let crypto = Crypto::from_seed([11; 32]);
    let mut group = reference_group(&crypto, 2);
    let new_member = LocalPeer::generate(&crypto).unwrap();
    let output = group[0].split(&crypto, &new_member.peer(), None).unwrap();

    // Another device of the new member can't decrypt the stage key.
    let other_device = new_member.new_device(&crypto).unwrap();
    assert!(matches!(
        Art::from_split_message(&crypto, other_device, &output.snapshot, &output.message),
        Err(ArtError::InvalidSignature(_))
    ));

    // Existing members can't decrypt the stage key which was meant for the new member.
    let existing = group[1].local_peer().clone();
    assert!(Art::from_split_message(&crypto, existing, &output.snapshot, &output.message).is_err());
}

#[test]
fn split_message_for_sibling_device() {
    let crypto = Crypto::from_seed([17; 32]);
    let mut group = reference_group(&crypto, 3);
    let second_device = group[1].local_peer().new_device(&crypto).unwrap();
    let third_device = group[1].local_peer().new_device(&crypto).unwrap();

    let output = group[1]
        .split(&crypto, &second_device.peer(), None)
        .unwrap();

    // Same identity, so the stage key decrypts and both signatures are valid. The ephemeral key
    // still needs to match the recipient of the split.
    assert!(matches!(
        Art::from_split_message(&crypto, third_device, &output.snapshot, &output.message),
        Err(ArtError::InvalidArgument(_))
    ));

    group[0].process_split(&crypto, &output.message).unwrap();
    group[2].process_split(&crypto, &output.message).unwrap();
    group.push(
        Art::from_split_message(&crypto, second_device, &output.snapshot, &output.message)
            .unwrap(),
    );
    assert_converged(&group);
}

#[test]
fn tampered_setup_message() {
    let crypto = Crypto::from_seed([12; 32]);
    let locals = generate_local_peers(&crypto, 3);
    let group = group_of(&crypto, locals.clone());
    let setup_message = group[0].setup_message();

    for index in 0..setup_message.len() {
        let tampered = flip_bit(setup_message, index);
        assert!(
            matches!(
                Art::from_setup_message(&crypto, locals[1].clone(), &tampered),
                Err(ArtError::InvalidSignature(_))
            ),
            "flipped byte {index} was accepted"
        );
    }

    // Signed by another member instead of the initiator.
    let mut resigned = setup_message[..setup_message.len() - 64].to_vec();
    let signature = crypto
        .sign(&resigned, &locals[2].identity().secret_key)
        .unwrap();
    resigned.extend_from_slice(signature.as_bytes());
    assert!(matches!(
        Art::from_setup_message(&crypto, locals[1].clone(), &resigned),
        Err(ArtError::InvalidSignature(_))
    ));

    // Not a member of this tree.
    let stranger = LocalPeer::generate(&crypto).unwrap();
    assert!(matches!(
        Art::from_setup_message(&crypto, stranger, setup_message),
        Err(ArtError::InvalidArgument(_))
    ));
}

#[test]
fn tampered_key_update() {
    let crypto = Crypto::from_seed([13; 32]);
    let mut group = reference_group(&crypto, 3);
    let message = group[1].update_key(&crypto, None).unwrap();

    for index in 0..message.len() {
        let tampered = flip_bit(&message, index);
        let mut art = group[0].clone();
        assert!(
            matches!(
                art.process_key_update(&crypto, &tampered),
                Err(ArtError::InvalidSignature(_))
            ),
            "flipped byte {index} was accepted"
        );
        assert_eq!(art.tree(), group[0].tree());
        assert_eq!(art.stage_key(), group[0].stage_key());
    }

    // The untouched message still applies.
    group[0].process_key_update(&crypto, &message).unwrap();
    assert_eq!(group[0].stage_key(), group[1].stage_key());
}

#[test]
fn tampered_split() {
    let crypto = Crypto::from_seed([14; 32]);
    let mut group = reference_group(&crypto, 3);
    let new_member = LocalPeer::generate(&crypto).unwrap();
    let output = group[0].split(&crypto, &new_member.peer(), None).unwrap();

    for index in 0..output.message.len() {
        let tampered = flip_bit(&output.message, index);
        let mut art = group[1].clone();
        assert!(
            matches!(
                art.process_split(&crypto, &tampered),
                Err(ArtError::InvalidSignature(_))
            ),
            "flipped byte {index} of split message was accepted"
        );
        assert_eq!(art.tree(), group[1].tree());

        assert!(
            matches!(
                Art::from_split_message(
                    &crypto,
                    new_member.clone(),
                    &output.snapshot,
                    &tampered
                ),
                Err(ArtError::InvalidSignature(_))
            ),
            "flipped byte {index} of split message was accepted by new member"
        );
    }

    for index in 0..output.snapshot.len() {
        let tampered = flip_bit(&output.snapshot, index);
        assert!(
            matches!(
                Art::from_split_message(
                    &crypto,
                    new_member.clone(),
                    &tampered,
                    &output.message
                ),
                Err(ArtError::InvalidSignature(_))
            ),
            "flipped byte {index} of snapshot was accepted"
        );
    }

    Art::from_split_message(&crypto, new_member, &output.snapshot, &output.message).unwrap();
}

#[test]
fn ratchets_apply_in_order() {
    let crypto = Crypto::from_seed([15; 32]);
    let mut group = reference_group(&crypto, 3);

    let first = group[1].update_key(&crypto, None).unwrap();
    let second = group[1].update_key(&crypto, None).unwrap();

    // The second update is signed with a stage key the others don't know yet.
    let before = group[0].clone();
    assert!(matches!(
        group[0].process_key_update(&crypto, &second),
        Err(ArtError::InvalidSignature(_))
    ));
    assert_eq!(group[0].tree(), before.tree());
    assert_eq!(group[0].stage_key(), before.stage_key());

    group[0].process_key_update(&crypto, &first).unwrap();
    group[0].process_key_update(&crypto, &second).unwrap();
    assert_eq!(group[0].stage_key(), group[1].stage_key());

    // Replaying an update fails since the stage moved on.
    assert!(matches!(
        group[0].process_key_update(&crypto, &first),
        Err(ArtError::InvalidSignature(_))
    ));
}

#[test]
fn initiate_boundaries() {
    let crypto = Crypto::from_seed([16; 32]);
    let locals = generate_local_peers(&crypto, 3);

    assert!(matches!(
        Art::initiate(&crypto, Vec::new()),
        Err(ArtError::InvalidArgument(_))
    ));
    assert!(matches!(
        Art::initiate(&crypto, vec![Member::Local(locals[0].clone())]),
        Err(ArtError::InvalidArgument(_))
    ));
    assert!(matches!(
        Art::initiate(
            &crypto,
            vec![
                Member::Remote(locals[0].peer()),
                Member::Remote(locals[1].peer())
            ]
        ),
        Err(ArtError::InconsistentState(_))
    ));
    assert!(matches!(
        Art::initiate(
            &crypto,
            vec![
                Member::Local(locals[0].clone()),
                Member::Local(locals[1].clone())
            ]
        ),
        Err(ArtError::InvalidArgument(_))
    ));
    assert!(matches!(
        Art::initiate(
            &crypto,
            vec![
                Member::Local(locals[0].clone()),
                Member::Remote(locals[1].peer()),
                Member::Remote(locals[1].peer())
            ]
        ),
        Err(ArtError::InvalidArgument(_))
    ));
}

#[test]
fn malformed_key_update() {
    let crypto = Crypto::from_seed([17; 32]);
    let mut group = reference_group(&crypto, 2);

    let odd = vec![0; 3 * 32 + 2 * 64];
    assert!(matches!(
        group[0].process_key_update(&crypto, &odd),
        Err(ArtError::InvalidArgument(_))
    ));

    // Correctly signed but for a leaf nobody has.
    let signature = group[1].local_peer().ephemeral_signature().clone();
    let pairs = vec![(
        PublicKey::from_bytes(vec![1; 32]),
        group[1].local_peer().ephemeral().public_key.clone(),
    )];
    let message = KeyUpdateMessage::encode(
        &crypto,
        &pairs,
        &signature,
        &group[1].stage_key().secret_key,
    )
    .unwrap();
    assert!(matches!(
        group[0].process_key_update(&crypto, &message),
        Err(ArtError::InvalidArgument(_))
    ));

    // Correctly signed but with a path which is too short.
    let leaf_key = group[1].leaf().unwrap().public_key().clone();
    let pairs = vec![(
        leaf_key,
        group[1].local_peer().ephemeral().public_key.clone(),
    )];
    let message = KeyUpdateMessage::encode(
        &crypto,
        &pairs,
        &signature,
        &group[1].stage_key().secret_key,
    )
    .unwrap();
    let before = group[0].clone();
    assert!(matches!(
        group[0].process_key_update(&crypto, &message),
        Err(ArtError::InconsistentState(_))
    ));
    assert_eq!(group[0].tree(), before.tree());
    assert_eq!(group[0].stage_key(), before.stage_key());
}

#[test]
fn key_update_with_foreign_ephemeral_signature() {
    let crypto = Crypto::from_seed([18; 32]);
    let mut group = reference_group(&crypto, 3);
    let mut attacker = group[2].clone();

    // Member 2 announces a key update for member 1's leaf, but can't sign the new ephemeral key
    // with member 1's identity.
    let leaf_key = group[1].leaf().unwrap().public_key().clone();
    let root_key = group[1]
        .tree()
        .public_key(group[1].tree().root())
        .unwrap()
        .clone();
    let middle = group[1].tree().path_of(&group[1].local_peer().peer())[1];
    let middle_key = group[1].tree().public_key(middle).unwrap().clone();
    let ephemeral = KeyPair::generate(&crypto).unwrap();
    let pairs = vec![
        (leaf_key, ephemeral.public_key.clone()),
        (middle_key.clone(), middle_key),
        (root_key.clone(), root_key),
    ];
    let signature = crypto
        .sign(
            ephemeral.public_key.as_bytes(),
            &attacker.local_peer().identity().secret_key,
        )
        .unwrap();
    let message =
        KeyUpdateMessage::encode(&crypto, &pairs, &signature, &attacker.stage_key().secret_key)
            .unwrap();

    assert!(matches!(
        group[0].process_key_update(&crypto, &message),
        Err(ArtError::InvalidSignature(_))
    ));
    assert!(attacker.process_key_update(&crypto, &message).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn converge_after_ratchets(
        members in 2usize..7,
        updaters in prop::collection::vec(any::<prop::sample::Index>(), 1..6),
        seed in any::<[u8; 32]>(),
    ) {
        let crypto = Crypto::from_seed(seed);
        let mut group = reference_group(&crypto, members);

        for updater in updaters {
            ratchet(&crypto, &mut group, updater.index(members));
        }

        let expected = group[0].stage_key().clone();
        for art in &group {
            prop_assert_eq!(art.stage_key(), &expected);
        }
    }
}
