use chan::Sender;
use hyper::client::{Body, Client as HyperClient, ProxyConfig, RedirectPolicy,
                    Response as HyperResponse};
use hyper::header::{ByteRangeSpec, Connection, ContentLength, ContentType,
                    Headers, Location, Range};
use hyper::mime::{Mime, TopLevel, SubLevel};
use hyper::net::HttpsConnector;
use hyper::status::StatusCode;
use std::env;
use std::io::Read;
use std::time::Duration;

use datatype::Error;
use http::{Client, Request, Response, ResponseData, TlsClient};
use url::Url;


/// An HTTP client for the device gateway, authenticated by the mutual TLS
/// session established from the provisioned credentials.
pub struct AuthClient {
    client: HyperClient,
}

impl Default for AuthClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl Client for AuthClient {
    fn chan_request(&self, req: Request, resp_tx: Sender<Response>) {
        resp_tx.send(self.send(req));
    }
}

impl AuthClient {
    /// Create a new HTTP client with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        let mut client = match env::var("HTTP_PROXY") {
            Ok(ref proxy) => {
                let url = Url::parse(proxy).unwrap_or_else(|err| panic!("couldn't parse HTTP_PROXY: {}", err));
                let host = url.host_str().expect("couldn't parse HTTP_PROXY host").to_string();
                let port = url.port_or_known_default().expect("couldn't parse HTTP_PROXY port");
                HyperClient::with_proxy_config(ProxyConfig(host, port, TlsClient::new()))
            },

            Err(_) => HyperClient::with_connector(HttpsConnector::new(TlsClient::new()))
        };

        client.set_redirect_policy(RedirectPolicy::FollowNone);
        client.set_read_timeout(Some(timeout));
        client.set_write_timeout(Some(timeout));

        AuthClient { client: client }
    }

    fn send(&self, req: Request) -> Response {
        let mut headers = Headers::new();
        headers.set(Connection::close());
        headers.set(ContentLength(req.body.as_ref().map_or(0, |body| body.len() as u64)));
        headers.set(ContentType(Mime(TopLevel::Application, SubLevel::Json, vec![])));
        if let Some(offset) = req.resume_from {
            headers.set(Range::Bytes(vec![ByteRangeSpec::AllFrom(offset)]));
        }

        let mut request = self.client
            .request(req.method.clone().into(), (*req.url).clone())
            .headers(headers);

        if let Some(ref body) = req.body {
            request = request.body(Body::BufBody(body, body.len()));
            trace!("request length: {} bytes", body.len());
        }

        match request.send() {
            Ok(mut resp) => {
                debug!("response status: {}", resp.status);
                let mut body = Vec::new();
                let read = match req.limit {
                    Some(limit) => resp.by_ref().take(limit + 1).read_to_end(&mut body),
                    None        => resp.read_to_end(&mut body)
                };
                if let Err(err) = read {
                    return Response::Error(Box::new(Error::Client(format!("couldn't read response body: {}", err))));
                }
                if let Some(limit) = req.limit {
                    if body.len() as u64 > limit {
                        return Response::Error(Box::new(Error::SizeLimit(limit)));
                    }
                }
                let data = ResponseData { code: resp.status, body: body };

                if resp.status.is_redirection() {
                    self.redirect_request(&req, resp)
                } else if resp.status.is_success() {
                    Response::Success(data)
                } else if resp.status == StatusCode::Unauthorized || resp.status == StatusCode::Forbidden {
                    Response::Error(Box::new(Error::HttpAuth(data)))
                } else {
                    Response::Failed(data)
                }
            }

            Err(err) => Response::Error(Box::new(Error::Client(format!("couldn't send request: {}", err))))
        }
    }

    fn redirect_request(&self, req: &Request, resp: HyperResponse) -> Response {
        resp.headers.get::<Location>()
            .map(|loc| {
                self.send(Request {
                    url: match loc.parse() {
                        Ok(url) => url,
                        Err(_) if &loc[0..1] == "/" => req.url.join(loc),
                        Err(_) => return Response::Error(Box::new(Error::Parse(format!("not a url: {}", loc))))
                    },
                    method:      req.method.clone(),
                    body:        req.body.clone(),
                    resume_from: req.resume_from,
                    limit:       req.limit,
                })
            }).unwrap_or_else(|| Response::Error(Box::new(Error::Client("redirect missing Location header".into()))))
    }
}
