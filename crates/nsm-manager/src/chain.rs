use async_trait::async_trait;
use nsm_api::{Connection, NetworkServiceRequest, NsmError, Result};
use std::sync::Arc;
use tracing::Instrument;

use crate::context::RequestContext;

/// One stage of the request pipeline.
///
/// A stage either answers itself or hands the (possibly modified) request to
/// the rest of the chain through `next`.
#[async_trait]
pub trait NetworkServiceServer: Send + Sync {
    async fn request(&self, ctx: RequestContext, request: NetworkServiceRequest, next: Next<'_>) -> Result<Connection>;

    async fn close(&self, ctx: RequestContext, connection: Connection, next: Next<'_>) -> Result<()>;
}

/// The remainder of a chain, as seen by the stage currently running.
///
/// When a [`CompositeService`] runs as a stage, its own servers are followed
/// by whatever came after it in the enclosing chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    servers: &'a [Arc<dyn NetworkServiceServer>],
    then: Option<&'a Next<'a>>,
}

impl<'a> Next<'a> {
    pub fn new(servers: &'a [Arc<dyn NetworkServiceServer>]) -> Self {
        Self { servers, then: None }
    }

    /// The end of a chain: requests return their own connection.
    pub fn tail() -> Next<'static> {
        Next {
            servers: &[],
            then: None,
        }
    }

    fn followed_by(mut self, then: &'a Next<'a>) -> Self {
        self.then = Some(then);
        self
    }

    /// Steps to the next server to run, if any is left.
    fn split(self) -> Option<(&'a Arc<dyn NetworkServiceServer>, Next<'a>)> {
        let mut current = self;
        loop {
            if let Some((server, rest)) = current.servers.split_first() {
                let next = Next {
                    servers: rest,
                    then: current.then,
                };
                return Some((server, next));
            }
            current = *current.then?;
        }
    }

    pub async fn process_next(self, ctx: RequestContext, request: NetworkServiceRequest) -> Result<Connection> {
        match self.split() {
            Some((server, next)) => server.request(ctx, request, next).await,
            None => request
                .connection
                .ok_or_else(|| NsmError::Validation("request has no connection".to_string())),
        }
    }

    pub async fn process_close(self, ctx: RequestContext, connection: Connection) -> Result<()> {
        match self.split() {
            Some((server, next)) => server.close(ctx, connection, next).await,
            None => Ok(()),
        }
    }
}

/// Runs its servers in order, either as the whole pipeline or as one stage.
pub struct CompositeService {
    name: String,
    servers: Vec<Arc<dyn NetworkServiceServer>>,
}

impl CompositeService {
    pub fn new(name: impl Into<String>, servers: Vec<Arc<dyn NetworkServiceServer>>) -> Self {
        Self {
            name: name.into(),
            servers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn process_request(&self, ctx: RequestContext, request: NetworkServiceRequest) -> Result<Connection> {
        self.request(ctx, request, Next::tail()).await
    }

    pub async fn process_close(&self, ctx: RequestContext, connection: Connection) -> Result<()> {
        self.close(ctx, connection, Next::tail()).await
    }
}

#[async_trait]
impl NetworkServiceServer for CompositeService {
    async fn request(&self, ctx: RequestContext, request: NetworkServiceRequest, next: Next<'_>) -> Result<Connection> {
        let span = tracing::info_span!(parent: ctx.span(), "request", chain = %self.name);
        let ctx = ctx.with_span(span.clone());
        Next::new(&self.servers)
            .followed_by(&next)
            .process_next(ctx, request)
            .instrument(span)
            .await
    }

    async fn close(&self, ctx: RequestContext, connection: Connection, next: Next<'_>) -> Result<()> {
        let span = tracing::info_span!(parent: ctx.span(), "close", chain = %self.name);
        let ctx = ctx.with_span(span.clone());
        Next::new(&self.servers)
            .followed_by(&next)
            .process_close(ctx, connection)
            .instrument(span)
            .await
    }
}
