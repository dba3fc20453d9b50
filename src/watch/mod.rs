// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watch plumbing: reconnecting event streams, the handlers they fan out to, the
//! version-ordered dedup queue between streams and the dispatcher, and the on-disk
//! snapshot store used to replay deletions missed while disconnected.

pub mod handler;
pub mod queue;
pub mod snapshot;
pub mod stream;

pub use handler::{QueueHandler, ResourceObjectEventHandler};
pub use queue::ResourceObjectQueue;
pub use snapshot::SnapshotStore;
pub use stream::{KubeWatchSource, ResourceObjectEventStream, WatchSource};
