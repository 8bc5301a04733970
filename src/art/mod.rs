// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous Ratcheting Tree (ART) group key agreement.
//!
//! A group is created by an initiator who builds a tree over all members and distributes a signed
//! setup message. Every other member reconstructs the same tree from it and derives the same
//! stage key without any further interaction.
//!
//! Afterwards members can:
//!
//! - rotate their own leaf key ("ratchet") with [`Art::update_key`], to be applied by everyone
//!   else with [`Art::process_key_update`],
//! - add new members by splitting a leaf with [`Art::split`], applied by existing members with
//!   [`Art::process_split`] and by the new member with [`Art::from_split_message`].
//!
//! Every message is signed with the stage key it was created under. Members only accept messages
//! signed with their own current stage key, so all operations need to be applied in the same
//! order by everyone.
//!
//! <https://eprint.iacr.org/2017/666.pdf>
#[allow(clippy::module_inception)]
mod art;
#[cfg(test)]
mod tests;

pub use art::{Art, Member, SplitOutput};
