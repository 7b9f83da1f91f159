use chan::Sender;
use hyper::status::StatusCode;
use std::cell::RefCell;
use std::collections::HashMap;

use datatype::Error;
use http::{Client, Request, Response, ResponseData};


/// The `TestClient` will return HTTP responses from an existing list of
/// canned bodies, in order, or by matching the request's URL path.
pub struct TestClient {
    responses: RefCell<Vec<Vec<u8>>>,
    routes:    RefCell<HashMap<String, Vec<Vec<u8>>>>,
}

impl Default for TestClient {
    fn default() -> Self {
        TestClient { responses: RefCell::new(Vec::new()), routes: RefCell::new(HashMap::new()) }
    }
}

impl TestClient {
    /// Create a new `TestClient` that will return these responses in order.
    pub fn from(responses: Vec<Vec<u8>>) -> TestClient {
        TestClient { responses: RefCell::new(responses), routes: RefCell::new(HashMap::new()) }
    }

    /// Create a new `TestClient` that matches on URL path suffixes. Each
    /// matched response is consumed; repeated requests pop the next one.
    pub fn from_routes(routes: HashMap<String, Vec<Vec<u8>>>) -> TestClient {
        TestClient { responses: RefCell::new(Vec::new()), routes: RefCell::new(routes) }
    }

    /// Serve the same body for every request to the path, forever.
    pub fn add_route(&self, path: &str, body: Vec<u8>) {
        self.routes.borrow_mut().entry(path.into()).or_insert_with(Vec::new).push(body);
    }
}

impl Client for TestClient {
    fn chan_request(&self, req: Request, resp_tx: Sender<Response>) {
        let path = req.url.path().to_string();
        if !self.routes.borrow().is_empty() {
            let mut routes = self.routes.borrow_mut();
            let found = routes.iter_mut()
                .find(|&(ref suffix, _)| path.ends_with(suffix.as_str()))
                .map(|(_, bodies)| if bodies.len() > 1 { bodies.remove(0) } else { bodies[0].clone() });
            return match found {
                Some(body) => {
                    let mut body = body;
                    if let Some(offset) = req.resume_from {
                        body = body.split_off(offset as usize);
                    }
                    resp_tx.send(Response::Success(ResponseData { code: StatusCode::Ok, body: body }))
                }
                None => resp_tx.send(Response::Failed(ResponseData {
                    code: StatusCode::NotFound,
                    body: Vec::new()
                }))
            };
        }

        match self.responses.borrow_mut().len() {
            0 => resp_tx.send(Response::Error(Box::new(Error::Client(req.url.to_string())))),
            _ => {
                let body = self.responses.borrow_mut().remove(0);
                resp_tx.send(Response::Success(ResponseData { code: StatusCode::Ok, body: body }))
            }
        }
    }

    fn is_testing(&self) -> bool { true }
}
