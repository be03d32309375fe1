// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Blob runtime: the blob contract, the compiled blob and the thread
//! host.

mod blob;
mod compiled;
mod host;
pub(crate) mod shared;

pub use blob::{Blob, BlobState, CoreCode, DrainCallback};
pub(crate) use blob::{CoreRunner, DrainControl};
pub use compiled::CompiledBlob;
pub use host::StreamHost;
