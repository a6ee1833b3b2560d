//! Handlers, middleware and predicate routing.
//!
//! Middleware wraps the routing stage in registration order: the first
//! registered middleware is the outermost and runs first. A middleware
//! short-circuits by returning without calling `next`.
//!
//! ```ignore
//! server.use_middleware(|next| {
//!     handler_fn(move |ctx| {
//!         let next = next.clone();
//!         Box::pin(async move {
//!             if ctx.received().as_bytes() == b"00000" {
//!                 ctx.send(Packet::from("11111")).await?;
//!                 return Ok(());
//!             }
//!             next.call(ctx).await
//!         })
//!     })
//! });
//! ```

use crate::context::Context;
use crate::error::HandlerResult;
use crate::message::Message;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Processes one received message.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult>;
}

/// Shared handler.
pub type HandlerRef = Arc<dyn Handler>;

/// Transforms a handler into another, typically wrapping it.
pub type Middleware = Arc<dyn Fn(HandlerRef) -> HandlerRef + Send + Sync>;

/// Decides whether a route applies to a received message.
pub type Predicate = Arc<dyn Fn(&dyn Message) -> bool + Send + Sync>;

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        (self.0)(ctx)
    }
}

/// Wrap a closure returning a boxed future as a [`HandlerRef`].
pub fn handler_fn<F>(f: F) -> HandlerRef
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// A predicate and the handler it selects.
#[derive(Clone)]
pub struct RouterPair {
    predicate: Predicate,
    handler: HandlerRef,
}

impl RouterPair {
    pub fn new(predicate: Predicate, handler: HandlerRef) -> Self {
        Self { predicate, handler }
    }

    pub fn matches(&self, message: &dyn Message) -> bool {
        (self.predicate)(message)
    }
}

/// Scans routes in registration order; the first match wins, otherwise the
/// default handler runs.
pub struct Router {
    routes: Arc<[RouterPair]>,
    default: HandlerRef,
}

impl Router {
    pub fn new(routes: Arc<[RouterPair]>, default: HandlerRef) -> Self {
        Self { routes, default }
    }

    fn select(&self, message: &dyn Message) -> &HandlerRef {
        self.routes
            .iter()
            .find(|route| route.matches(message))
            .map(|route| &route.handler)
            .unwrap_or(&self.default)
    }
}

impl Handler for Router {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        let handler = self.select(ctx.received());
        handler.call(ctx)
    }
}

/// Wrap `inner` with `middleware` so that `middleware[0]` is outermost.
pub fn compose(middleware: &[Middleware], inner: HandlerRef) -> HandlerRef {
    middleware.iter().rev().fold(inner, |next, wrap| wrap(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ConnectionId;
    use crate::message::{BoxMessage, Packet};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    fn context(data: &str) -> (Context, mpsc::Receiver<BoxMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let ctx = Context::new(
            ConnectionId::from_raw([0; 16]),
            Box::new(Packet::from(data)),
            tx,
        );
        (ctx, rx)
    }

    fn recording(trace: &Trace, name: &'static str) -> HandlerRef {
        let trace = Arc::clone(trace);
        handler_fn(move |_ctx| {
            trace.lock().unwrap().push(name);
            Box::pin(async { Ok(()) })
        })
    }

    fn starts_with(prefix: &'static [u8]) -> Predicate {
        Arc::new(move |m: &dyn Message| m.as_bytes().starts_with(prefix))
    }

    fn tracing_middleware(trace: &Trace, name: &'static str) -> Middleware {
        let trace = Arc::clone(trace);
        Arc::new(move |next: HandlerRef| {
            let trace = Arc::clone(&trace);
            handler_fn(move |ctx| {
                trace.lock().unwrap().push(name);
                let next = Arc::clone(&next);
                Box::pin(async move { next.call(ctx).await })
            })
        })
    }

    #[tokio::test]
    async fn test_first_matching_route_wins() {
        let trace = Trace::default();
        let routes: Arc<[RouterPair]> = vec![
            RouterPair::new(starts_with(b"he"), recording(&trace, "p1")),
            RouterPair::new(starts_with(b"hel"), recording(&trace, "p2")),
        ]
        .into();
        let router = Router::new(routes, recording(&trace, "default"));

        let (mut ctx, _rx) = context("hello");
        router.call(&mut ctx).await.unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["p1"]);
    }

    #[tokio::test]
    async fn test_default_when_no_route_matches() {
        let trace = Trace::default();
        let routes: Arc<[RouterPair]> =
            vec![RouterPair::new(starts_with(b"x"), recording(&trace, "x"))].into();
        let router = Router::new(routes, recording(&trace, "default"));

        let (mut ctx, _rx) = context("hello");
        router.call(&mut ctx).await.unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["default"]);
    }

    #[tokio::test]
    async fn test_middleware_order() {
        let trace = Trace::default();
        let chain = compose(
            &[
                tracing_middleware(&trace, "outer"),
                tracing_middleware(&trace, "inner"),
            ],
            recording(&trace, "handler"),
        );

        let (mut ctx, _rx) = context("hello");
        chain.call(&mut ctx).await.unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["outer", "inner", "handler"]);
    }

    #[tokio::test]
    async fn test_middleware_short_circuit() {
        let trace = Trace::default();
        let answer: Middleware = Arc::new(|next: HandlerRef| {
            handler_fn(move |ctx| {
                let next = Arc::clone(&next);
                Box::pin(async move {
                    if ctx.received().as_bytes() == b"00000" {
                        ctx.send(Packet::from("11111")).await?;
                        return Ok(());
                    }
                    next.call(ctx).await
                })
            })
        });
        let chain = compose(&[answer], recording(&trace, "handler"));

        let (mut ctx, mut rx) = context("00000");
        chain.call(&mut ctx).await.unwrap();
        drop(ctx);

        assert_eq!(rx.recv().await.unwrap().as_bytes(), b"11111");
        assert!(rx.recv().await.is_none());
        assert!(trace.lock().unwrap().is_empty());
    }
}
