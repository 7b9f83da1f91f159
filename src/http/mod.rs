pub mod auth_client;
pub mod http_client;
pub mod test_client;
pub mod tls;

pub use self::auth_client::AuthClient;
pub use self::http_client::{Client, Request, Response, ResponseData, MAX_REPLY_SIZE};
pub use self::test_client::TestClient;
pub use self::tls::{TlsClient, TlsData};
