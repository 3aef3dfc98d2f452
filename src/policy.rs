/*
 * Who may call what.
 *
 * Routes declare an `Access` level and the `auth::Guard` middleware asks
 * `check` before the handler runs.
 */
use crate::error::{Error, Result};
use crate::models::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    Admin,
}

pub fn check(caller: Option<Role>, access: Access) -> Result<()> {
    match (access, caller) {
        (Access::Public, _) => Ok(()),
        (_, None) => Err(Error::unauthorized(
            "Authentication credentials were not provided.",
        )),
        (Access::Authenticated, Some(_)) => Ok(()),
        (Access::Admin, Some(Role::Admin)) => Ok(()),
        (Access::Admin, Some(Role::User)) => Err(Error::forbidden(
            "You do not have permission to perform this action.",
        )),
    }
}
