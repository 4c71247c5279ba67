//! Small helpers that don't need to be part of the public API.

use std::sync::LockResult;

//Take the guard out of a LockResult whether or not the lock was poisoned.
//
//Every lock in this crate is released with its data in a consistent state, even when an action
//panics on the way out, so a poisoned lock carries nothing worth refusing.
//
//Source for the name: http://bulbapedia.bulbagarden.net/wiki/Guts_(Ability)
pub fn guts<T>(res: LockResult<T>) -> T {
    res.unwrap_or_else(|poison| poison.into_inner())
}
