// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use nix::errno::Errno;
use std::time::Duration;

/// Errors returned by a [`LinkDataplane`](crate::LinkDataplane).
///
/// The variants are classified so that callers can tell "the thing isn't there" apart from
/// "try again later" and "an operator has to intervene".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The link (or address) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The kernel did not answer within the configured netlink timeout.
    #[error("netlink request timed out after {0:?}")]
    Timeout(Duration),
    /// The process lacks the privileges to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Any other kernel / netlink failure.
    #[error("netlink error: {message}")]
    Kernel {
        /// The errno reported by the kernel, if any.
        errno: Option<Errno>,
        /// Human readable description.
        message: String,
    },
    /// The kernel answered with something we could not make sense of.
    #[error("malformed netlink message: {0}")]
    Malformed(String),
}

impl LinkError {
    /// True if the error means the object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, LinkError::NotFound(_))
    }

    /// True if retrying the same operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LinkError::Timeout(_) | LinkError::Kernel { .. } | LinkError::Malformed(_)
        )
    }

    /// True if the error requires operator action (e.g. missing `CAP_NET_ADMIN`).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::PermissionDenied(_))
    }
}

impl From<rtnetlink::Error> for LinkError {
    fn from(err: rtnetlink::Error) -> Self {
        let message = err.to_string();
        let rtnetlink::Error::NetlinkError(msg) = &err else {
            return LinkError::Kernel {
                errno: None,
                message,
            };
        };
        // netlink reports negated errno values
        let errno = Errno::from_raw(-msg.code.map_or(0, std::num::NonZeroI32::get));
        match errno {
            Errno::ENODEV | Errno::ENOENT | Errno::EADDRNOTAVAIL => LinkError::NotFound(message),
            Errno::EPERM | Errno::EACCES => LinkError::PermissionDenied(message),
            errno => LinkError::Kernel {
                errno: Some(errno),
                message,
            },
        }
    }
}
