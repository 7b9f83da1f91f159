use chan::{self, Sender, Receiver};
use hyper::status::StatusCode;
use std::fmt::{self, Display, Formatter};
use std::str;

use datatype::{Error, Method, Url};


/// The maximum size of a POST/PUT response body that will be buffered.
pub const MAX_REPLY_SIZE: u64 = 64 * 1024;

/// Abstracts a particular HTTP Client implementation with methods for sending
/// `Request`s and receiving asynchronous `Response`s.
pub trait Client: Send {
    fn chan_request(&self, req: Request, resp_tx: Sender<Response>);

    fn send_request(&self, req: Request) -> Receiver<Response> {
        debug!("{} {}", req.method, req.url);
        let (resp_tx, resp_rx) = chan::async::<Response>();
        self.chan_request(req, resp_tx);
        resp_rx
    }

    fn get(&self, url: Url, limit: Option<u64>) -> Receiver<Response> {
        self.send_request(Request { method: Method::Get, url: url, body: None, resume_from: None, limit: limit })
    }

    /// GET starting at the given byte offset, for resuming a partial download.
    fn get_range(&self, url: Url, resume_from: u64, limit: Option<u64>) -> Receiver<Response> {
        self.send_request(Request {
            method: Method::Get,
            url: url,
            body: None,
            resume_from: Some(resume_from),
            limit: limit
        })
    }

    fn post(&self, url: Url, body: Option<Vec<u8>>) -> Receiver<Response> {
        self.send_request(Request {
            method: Method::Post,
            url: url,
            body: body,
            resume_from: None,
            limit: Some(MAX_REPLY_SIZE)
        })
    }

    fn put(&self, url: Url, body: Option<Vec<u8>>) -> Receiver<Response> {
        self.send_request(Request {
            method: Method::Put,
            url: url,
            body: body,
            resume_from: None,
            limit: Some(MAX_REPLY_SIZE)
        })
    }

    fn is_testing(&self) -> bool { false }
}


/// A new HTTP request to be sent from a specific Client.
#[derive(Debug)]
pub struct Request {
    pub method:      Method,
    pub url:         Url,
    pub body:        Option<Vec<u8>>,
    pub resume_from: Option<u64>,
    pub limit:       Option<u64>,
}


/// A Response enumerates between a successful (e.g. 2xx) HTTP response, a failed
/// (e.g. 4xx/5xx) response, or an Error before receiving any response.
#[derive(Debug)]
pub enum Response {
    Success(ResponseData),
    Failed(ResponseData),
    Error(Box<Error>)
}

impl Response {
    pub fn into_result(self) -> Result<Vec<u8>, Error> {
        match self {
            Response::Success(data) => Ok(data.body),
            Response::Failed(data)  => Err(data.into()),
            Response::Error(err)    => Err(*err)
        }
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Response::Success(ref data) |
            Response::Failed(ref data)  => write!(f, "{}", data),
            Response::Error(ref err)    => write!(f, "{}", err),
        }
    }
}


/// Wraps the HTTP Status Code as well as any returned body.
#[derive(Debug)]
pub struct ResponseData {
    pub code: StatusCode,
    pub body: Vec<u8>
}

impl Display for ResponseData {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.body.len() {
            len if len < 100*1024 => match str::from_utf8(&self.body) {
                Ok(text) => write!(f, "Response Code: {}, Body: {} bytes...\n{}", self.code, len, text),
                Err(_)   => write!(f, "Response Code: {}, Body: {} bytes", self.code, len)
            },
            len => write!(f, "Response Code: {}, Body: {} bytes", self.code, len)
        }
    }
}
