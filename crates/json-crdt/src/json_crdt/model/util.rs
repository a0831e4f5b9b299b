use rand::Rng;

use crate::json_crdt_patch::enums::session;

/// Random session id in the user range. Ids below
/// [`session::MIN_USER`] are reserved.
pub fn random_session_id() -> u64 {
    rand::thread_rng().gen_range(session::MIN_USER..=session::MAX)
}
