//! Handling of parcels arriving from the transport, and of requests this locality addressed to
//! itself.

use tracing::{debug, trace, warn};

use crate::{
    agas::Resolution,
    codec::Codec,
    error::RuntimeError,
    id::{GlobalId, LocalHandle, LocalityId},
};

use super::{
    parcel::{CorrelationId, Parcel, Request, Response},
    Runtime,
};

impl<C: Codec> Runtime<C> {
    pub(super) fn receive(&self, from: LocalityId, message: Vec<u8>) {
        let parcel = match self.inner.codec.decode::<Parcel>(&message) {
            Ok(parcel) => parcel,
            Err(err) => {
                warn!(%from, %err, "dropped undecodable parcel");
                return;
            }
        };

        match parcel {
            Parcel::Request {
                correlation_id,
                origin,
                hops,
                body,
            } => {
                trace!(%from, %origin, %correlation_id, hops, "received request");
                let runtime = self.clone();
                tokio::spawn(async move {
                    runtime
                        .handle_request(origin, correlation_id, hops, body)
                        .await;
                });
            }
            Parcel::Reply {
                correlation_id,
                responder,
                result,
            } => self.handle_reply(correlation_id, responder, result),
        }
    }

    fn handle_reply(
        &self,
        correlation_id: CorrelationId,
        responder: LocalityId,
        result: Result<Response, RuntimeError>,
    ) {
        let Some(pending) = self.inner.pending.take(correlation_id) else {
            debug!(%correlation_id, %responder, "discarded late reply");
            return;
        };

        if let Some(target) = pending.target {
            match &result {
                Ok(_) => self.inner.agas.remember(target, responder),
                Err(RuntimeError::UnknownId(_)) => self.inner.agas.forget(target),
                Err(_) => {}
            }
        }

        trace!(%correlation_id, %responder, action = ?pending.action, "received reply");
        pending.fulfill(result);
    }

    pub(super) async fn handle_request(
        self,
        origin: LocalityId,
        correlation_id: CorrelationId,
        hops: u8,
        body: Request,
    ) {
        let handle = match body.target() {
            Some(target) => match self.inner.agas.resolve(target) {
                Ok(Resolution::Local(handle)) => Some(handle),
                Ok(Resolution::Remote(next)) => {
                    return self
                        .forward(next, origin, correlation_id, hops, target, body)
                        .await;
                }
                Err(err) => return self.reply(origin, correlation_id, Err(err)).await,
            },
            None => None,
        };

        let result = self.execute(body, handle).await;
        self.reply(origin, correlation_id, result).await;
    }

    async fn forward(
        &self,
        next: LocalityId,
        origin: LocalityId,
        correlation_id: CorrelationId,
        hops: u8,
        target: GlobalId,
        body: Request,
    ) {
        if hops >= self.inner.config.max_forward_hops {
            debug!(%target, hops, "forwarding limit reached");
            return self
                .reply(origin, correlation_id, Err(RuntimeError::UnknownId(target)))
                .await;
        }

        debug!(%target, %next, hops, "forwarding request");
        let parcel = Parcel::Request {
            correlation_id,
            origin,
            hops: hops + 1,
            body,
        };
        if let Err(err) = self.send_parcel(next, &parcel).await {
            self.reply(origin, correlation_id, Err(err)).await;
        }
    }

    async fn reply(
        &self,
        origin: LocalityId,
        correlation_id: CorrelationId,
        result: Result<Response, RuntimeError>,
    ) {
        if origin == self.here() {
            self.inner.pending.complete(correlation_id, result);
            return;
        }

        let parcel = Parcel::Reply {
            correlation_id,
            responder: self.here(),
            result,
        };
        if let Err(err) = self.send_parcel(origin, &parcel).await {
            warn!(%origin, %correlation_id, %err, "failed to send reply");
        }
    }

    async fn execute(
        &self,
        body: Request,
        handle: Option<LocalHandle>,
    ) -> Result<Response, RuntimeError> {
        let hosted = || handle.ok_or(RuntimeError::TargetGone);

        match body {
            Request::Invoke { action, args, .. } => self
                .inner
                .actions
                .dispatch(action, hosted()?, args, &self.inner.instances)
                .await
                .map(Response::Invoked),
            Request::Resolve { .. } => Ok(Response::Resolved {
                locality: self.here(),
                handle: hosted()?,
            }),
            Request::Retire { target } => {
                self.retire_hosted(target).await;
                Ok(Response::Done)
            }
            Request::Migrate { target, to } => {
                self.migrate_hosted(target, to).await?;
                Ok(Response::Done)
            }
            Request::Create {
                component,
                count,
                args,
            } => self
                .construct_hosted(component, count, &args)
                .map(Response::Created),
            Request::InstanceCount { component } => Ok(Response::InstanceCount(
                self.inner.instances.count(component),
            )),
            Request::Adopt {
                target,
                component,
                state,
            } => {
                let handle =
                    self.inner
                        .components
                        .restore(component, &state, &self.inner.instances)?;
                self.inner.agas.adopt(target, handle);
                trace!(%target, "adopted migrating instance");
                Ok(Response::Done)
            }
            Request::Rebind { target, to } => {
                self.inner.agas.forward(target, to);
                Ok(Response::Done)
            }
            Request::Release { target } => {
                self.inner.agas.release(target);
                Ok(Response::Done)
            }
        }
    }
}
