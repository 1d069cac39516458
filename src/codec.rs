//! The `register`/`decode`/`encode`/`flush`/`close`/`accept` contract
//! shared by [`crate::assembler::Assembler`] and
//! [`crate::identity_map::IdentityMap`] (§6 "External interfaces").
//!
//! Grounded on the teacher's `Decoder`/`Encoder` split in `src/codec`:
//! there, the wire format is the seam between two traits; here the seam
//! is identity-routing, so one trait covers both, with `evict` as the
//! only operation [`IdentityMap`] adds over a standalone [`Assembler`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CapacityExceeded;
use crate::event::MergedEvent;
use crate::listener::{EmissionContext, Sink};

/// Common decode/flush/close surface. `identity` is `None` for a
/// standalone [`crate::assembler::Assembler`] (which ignores it) and
/// `Some`/`None` for [`crate::identity_map::IdentityMap`] (which uses it
/// to route).
#[async_trait]
pub trait Codec: Send + Sync {
    async fn decode(
        &self,
        identity: Option<&str>,
        chunk: &[u8],
        context: EmissionContext,
        sink: Arc<dyn Sink>,
    ) -> Result<(), CapacityExceeded>;

    async fn accept(
        &self,
        identity: Option<&str>,
        data: &[u8],
        path: Option<String>,
        sink: Arc<dyn Sink>,
    ) -> Result<(), CapacityExceeded>;

    fn encode(&self, event: MergedEvent);

    async fn flush(&self, sink: Option<&dyn Sink>);

    async fn close(&self);
}

#[async_trait]
impl Codec for crate::assembler::Assembler {
    async fn decode(
        &self,
        _identity: Option<&str>,
        chunk: &[u8],
        context: EmissionContext,
        sink: Arc<dyn Sink>,
    ) -> Result<(), CapacityExceeded> {
        crate::assembler::Assembler::decode(self, chunk, context, sink).await;
        Ok(())
    }

    async fn accept(
        &self,
        _identity: Option<&str>,
        data: &[u8],
        path: Option<String>,
        sink: Arc<dyn Sink>,
    ) -> Result<(), CapacityExceeded> {
        crate::assembler::Assembler::accept(self, data, path, sink).await;
        Ok(())
    }

    fn encode(&self, event: MergedEvent) {
        crate::assembler::Assembler::encode(self, event)
    }

    async fn flush(&self, sink: Option<&dyn Sink>) {
        if let Some(sink) = sink {
            crate::assembler::Assembler::flush(self, sink).await;
        } else {
            crate::assembler::Assembler::auto_flush(self).await;
        }
    }

    async fn close(&self) {
        crate::assembler::Assembler::close(self, None).await;
    }
}

#[async_trait]
impl Codec for crate::identity_map::IdentityMap {
    async fn decode(
        &self,
        identity: Option<&str>,
        chunk: &[u8],
        context: EmissionContext,
        sink: Arc<dyn Sink>,
    ) -> Result<(), CapacityExceeded> {
        crate::identity_map::IdentityMap::decode(self, identity, chunk, context, sink).await
    }

    async fn accept(
        &self,
        identity: Option<&str>,
        data: &[u8],
        path: Option<String>,
        sink: Arc<dyn Sink>,
    ) -> Result<(), CapacityExceeded> {
        crate::identity_map::IdentityMap::accept(self, identity, data, path, sink).await
    }

    fn encode(&self, _event: MergedEvent) {}

    async fn flush(&self, sink: Option<&dyn Sink>) {
        crate::identity_map::IdentityMap::flush(self, sink).await
    }

    async fn close(&self) {
        crate::identity_map::IdentityMap::close(self).await
    }
}
