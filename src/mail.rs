//! Publish transactional emails to the mail queue.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Mail;
use crate::error::{Result, ServerError};
use crate::user::User;

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

/// Mailer templates list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Greet a new account, linking to its profile page.
    Welcome,
    /// Carry a password-reset link, valid for ten minutes.
    PasswordReset,
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    to: Cow<'a, str>,
    name: Cow<'a, str>,
    template: Template,
    /// Action link rendered as the template's button.
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<Cow<'a, str>>,
}

/// Mail-queue publisher. Without a broker configured every publish is a
/// logged no-op, which keeps local development broker-free.
#[derive(Debug, Clone, Default)]
pub struct MailManager {
    queue: String,
    conn: Option<Arc<Connection>>,
}

impl MailManager {
    /// Create a new [`MailManager`] connected to the broker.
    pub async fn new(config: &Mail) -> Result<Self> {
        let addr = Url::parse(&config.address).map_err(|err| {
            ServerError::Internal {
                details: "invalid mail broker address".into(),
                source: Some(Box::new(err)),
            }
        })?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme()).map_err(|err| {
                ServerError::Internal {
                    details: format!("invalid mail broker scheme: {err}"),
                    source: None,
                }
            })?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString::default(),
        };

        let conn_config = ConnectionProperties::default()
            .with_connection_name("trailbound_mail_client".into());
        let conn = Connection::connect_uri(uri, conn_config)
            .await
            .map_err(|err| ServerError::Mail(Box::new(err)))?;

        tracing::info!(%addr, "mail broker connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(
        conn: Arc<Connection>,
        queue: &str,
    ) -> Result<Channel> {
        let channel = conn
            .create_channel()
            .await
            .map_err(|err| ServerError::Mail(Box::new(err)))?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| ServerError::Mail(Box::new(err)))?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "dev.trailbound.email",
            source: "dev.trailbound.api",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }

    /// Publish a mail event for a specific user.
    pub async fn publish_event(
        &self,
        template: Template,
        user: &User,
        url: Option<&str>,
    ) -> Result<()> {
        let Some(conn) = &self.conn else {
            tracing::debug!(?template, to = %user.email, "mail event dropped");
            return Ok(());
        };
        let channel =
            Self::create_channel(Arc::clone(conn), &self.queue).await?;

        let content = Content {
            to: Cow::from(&user.email),
            name: Cow::from(&user.name),
            template,
            url: url.map(Cow::from),
        };
        let payload = Self::create_event(content);
        let payload =
            serde_json::to_string(&payload).map_err(|err| {
                ServerError::Internal {
                    details: "mail event serialization failed".into(),
                    source: Some(Box::new(err)),
                }
            })?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await
            .map_err(|err| ServerError::Mail(Box::new(err)))?;

        tracing::trace!(to = %user.email, "mail event published");

        Ok(())
    }
}
