// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the device lifecycle engine.
//!
//! Hook methods implemented by concrete devices return [`Result`]. The
//! lifecycle patterns never propagate these errors to the caller of
//! `connect`/`disconnect`: they are converted into
//! [`DeviceEvent::Error`](crate::event::DeviceEvent::Error) events carrying
//! the error's display text.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred during transport communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error reported by the device itself.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Free-form failure raised by a concrete device hook.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Creates a free-form error from any displayable message.
    ///
    /// # Examples
    ///
    /// ```
    /// use device_lifecycle::Error;
    ///
    /// let err = Error::other("device refused handshake");
    /// assert_eq!(err.to_string(), "device refused handshake");
    /// ```
    #[must_use]
    pub fn other(message: impl std::fmt::Display) -> Self {
        Self::Other(message.to_string())
    }
}

/// Errors related to transport communication (HTTP, sockets, streams).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote answered with a non-success status.
    #[error("HTTP {code} - {reason}")]
    Status {
        /// Numeric status code.
        code: u16,
        /// Canonical reason phrase.
        reason: String,
    },

    /// Request timed out.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Connection to the device failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote end closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Underlying socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors related to device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Device is not connected.
    #[error("device is not connected")]
    NotConnected,

    /// Device configuration is invalid.
    #[error("invalid device configuration: {0}")]
    InvalidConfiguration(String),

    /// The device rejected a request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
