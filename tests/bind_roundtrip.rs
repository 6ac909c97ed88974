use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use ldap_bind::client;
use ldap_bind::config::{ClientConfig, ServerConfig};
use ldap_bind::ldap::{Message, MessageParams, MsgBindResponse, ResultCode};
use ldap_bind::server::{LdapServer, Service};
use ldap_bind::{Authentication, BindRequest, Result};
use tokio::net::TcpListener;

#[derive(Default)]
struct Directory {
    seen: Mutex<Vec<BindRequest>>,
}

struct Handle(Arc<Directory>);

impl Service for Handle {
    fn call(&self, req: Message) -> BoxFuture<'static, Result<Option<Message>>> {
        let dir = self.0.clone();
        Box::pin(async move {
            let MessageParams::Bind(b) = req.params else {
                return Ok(None);
            };
            let response = match b.authentication() {
                Some(Authentication::Simple { password }) if password == b"secret" => {
                    MsgBindResponse::new(ResultCode::Success)
                }
                Some(Authentication::Sasl(sasl)) if sasl.mechanism == "EXTERNAL" => {
                    let mut r = MsgBindResponse::new(ResultCode::SaslBindInProgress);
                    r.server_sasl_creds = Some(b"challenge".to_vec());
                    r
                }
                _ => MsgBindResponse::new(ResultCode::InvalidCredentials)
                    .with_diagnostic("bad password"),
            };
            dir.seen.lock().unwrap().push(b);
            Ok::<_, ldap_bind::Error>(Some(Message {
                id: req.id,
                params: MessageParams::BindResponse(response),
            }))
        })
    }
}

#[tokio::test]
async fn client_binds_against_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let dir = Arc::new(Directory::default());

    let server = Arc::new(LdapServer::new(ServerConfig::new(address.clone())));
    let svc = Arc::new(Handle(dir.clone()));
    tokio::spawn(async move { server.run(listener, svc).await });

    let conn = client::connect(ClientConfig::new(address)).await.unwrap();

    let ok = conn
        .bind_simple("uid=akarasulu,dc=example,dc=com", "secret")
        .await
        .unwrap();
    assert!(ok.result.is_success());

    let denied = conn.bind_simple("uid=akarasulu,dc=example,dc=com", "nope").await.unwrap();
    assert_eq!(denied.result, ResultCode::InvalidCredentials);
    assert_eq!(denied.diagnostic_message, "bad password");

    let sasl = conn.bind_sasl("", "EXTERNAL", None).await.unwrap();
    assert_eq!(sasl.result, ResultCode::SaslBindInProgress);
    assert_eq!(sasl.server_sasl_creds.as_deref(), Some(&b"challenge"[..]));

    let long_name = format!("cn={},dc=example,dc=com", "x".repeat(200));
    let res = conn.bind_simple(&long_name, "secret").await.unwrap();
    assert!(res.result.is_success());

    conn.unbind().await.unwrap();

    let seen = dir.seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[2], BindRequest::sasl("", "EXTERNAL", None));
    assert_eq!(seen[3].name(), Some(long_name.as_str()));
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    assert!(client::connect(ClientConfig::new(address)).await.is_err());
}
