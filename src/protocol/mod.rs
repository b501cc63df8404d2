// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport primitives used by the lifecycle patterns.
//!
//! Only the stateless pattern depends on a transport supplied by this crate:
//! a one-shot HTTP request with a fixed timeout that fails on any non-success
//! status. Streaming and persistent devices bring their own transport through
//! their hook implementations.

mod http;

pub use http::{HttpConfig, request, request_with};
pub use reqwest::{Method, Response};
