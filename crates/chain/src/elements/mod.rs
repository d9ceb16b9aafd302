//! Chain elements used by the client.
//!
//! Declared order when composed by the client binary:
//!
//! | # | Element | Request | Close |
//! |---|---------|---------|-------|
//! | 0 | [`Authorize`] | checks the returned path against its policies | passes through |
//! | 1 | [`UpdatePath`] | adds this client's path segment | re-points the path at it |
//! | 2 | [`DeviceToken`] | allocates an SR-IOV token id | frees it |
//! | 3 | [`MechanismSelector`] | filters and fills mechanism preferences | runs the negotiated family's close hook |
//! | 4 | [`SendFd`] | swaps file URLs for inode URLs and attaches descriptors | releases held descriptors |
//! | 5 | [`UpdateToken`] | stamps a bearer token on the path | stamps a token, forwards, then revokes the cached one |

mod authorize;
mod device_token;
mod mechanisms;
#[cfg(unix)]
mod send_fd;
mod update_path;
mod update_token;

pub use authorize::{Authorize, AuthorizePolicy, UnexpiredTokens};
pub use device_token::{DeviceToken, TokenPools};
pub use mechanisms::{KernelMechanism, MechanismHandler, MechanismSelector, VfioMechanism};
#[cfg(unix)]
pub use send_fd::SendFd;
pub use update_path::UpdatePath;
pub use update_token::UpdateToken;
