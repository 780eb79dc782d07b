use crate::errors::ProxyError;
use crate::router::Router;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::service::Service as HyperService;
use hyper::{Request, Response};
use shared::http::boxed_body;
use std::future::Future;
use std::pin::Pin;

/// Hyper service for the monitor listener.
pub struct MonitorService {
    router: Router,
}

impl MonitorService {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

impl HyperService<Request<Incoming>> for MonitorService {
    type Response = Response<BoxBody<Bytes, ProxyError>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        Box::pin(async move { Ok(router.route(req).await.map(boxed_body)) })
    }
}
