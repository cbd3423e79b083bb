//! YouTube OAuth and Data API client
//!
//! Covers what a relay needs: the consent URL, code and refresh-token
//! exchange, the authenticated channel, and creating a bound broadcast and
//! ingest stream. The supervisor itself only ever sees the resulting
//! [`StreamTarget`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::YouTubeConfig;
use crate::errors::{ApiError, ApiResult};
use crate::models::{SavedChannel, StreamTarget};

const TOKEN_PREVIEW_CHARS: usize = 20;
const WATCH_URL_BASE: &str = "https://www.youtube.com/watch?v=";

/// OAuth tokens as returned by Google's token endpoint
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl OAuthTokens {
    /// Decode the URL-encoded JSON handed back by the redirect helper
    pub fn from_query_param(encoded: &str) -> ApiResult<Self> {
        let decoded = urlencoding::decode(encoded)
            .map_err(|e| ApiError::InvalidTokens(format!("not valid URL encoding: {}", e)))?;
        serde_json::from_str(&decoded)
            .map_err(|e| ApiError::InvalidTokens(format!("not valid token JSON: {}", e)))
    }

    pub fn to_json(&self) -> ApiResult<String> {
        serde_json::to_string(self).map_err(|e| ApiError::InvalidTokens(e.to_string()))
    }

    pub fn from_json(json: &str) -> ApiResult<Self> {
        serde_json::from_str(json).map_err(|e| ApiError::InvalidTokens(e.to_string()))
    }
}

fn preview(secret: &str) -> String {
    let head: String = secret.chars().take(TOKEN_PREVIEW_CHARS).collect();
    format!("{}...", head)
}

impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &preview(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(preview))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub subscriber_count: Option<u64>,
    pub video_count: Option<u64>,
    pub view_count: Option<u64>,
}

impl ChannelInfo {
    /// Credentials record for the channel store
    pub fn to_saved_channel(&self, tokens: &OAuthTokens) -> ApiResult<SavedChannel> {
        let now = Utc::now();
        Ok(SavedChannel {
            channel_name: self.title.clone(),
            channel_id: self.channel_id.clone(),
            auth_json: tokens.to_json()?,
            created_at: now,
            last_used: now,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    #[default]
    Unlisted,
    Private,
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
            Privacy::Private => "private",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Privacy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Privacy::Public),
            "unlisted" => Ok(Privacy::Unlisted),
            "private" => Ok(Privacy::Private),
            _ => Err(format!("Unknown privacy status: {}", s)),
        }
    }
}

/// Everything needed to schedule a broadcast
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub title: String,
    pub description: String,
    pub scheduled_start: DateTime<Utc>,
    pub tags: Vec<String>,
    /// YouTube video category id, "20" is Gaming
    pub category_id: Option<String>,
    pub privacy: Privacy,
    pub made_for_kids: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveStreamInfo {
    pub stream_key: String,
    pub ingest_url: String,
    pub broadcast_id: String,
    pub stream_id: String,
    pub watch_url: String,
}

impl LiveStreamInfo {
    /// Publish target for the supervisor
    pub fn stream_target(&self) -> StreamTarget {
        StreamTarget::ExplicitUrl(format!(
            "{}/{}",
            self.ingest_url.trim_end_matches('/'),
            self.stream_key
        ))
    }
}

#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct ChannelItem {
    id: String,
    #[serde(default)]
    snippet: ChannelSnippet,
    #[serde(default)]
    statistics: ChannelStatistics,
}

#[derive(Deserialize, Default)]
struct ChannelSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

// Counts come back as decimal strings
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    subscriber_count: Option<String>,
    video_count: Option<String>,
    view_count: Option<String>,
}

#[derive(Deserialize)]
struct IdResource {
    id: String,
}

#[derive(Deserialize)]
struct LiveStreamResource {
    id: String,
    cdn: Option<LiveStreamCdn>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamCdn {
    ingestion_info: Option<IngestionInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestionInfo {
    stream_name: Option<String>,
    ingestion_address: Option<String>,
}

pub struct YouTubeClient {
    client: reqwest::Client,
    config: YouTubeConfig,
}

impl YouTubeClient {
    pub fn new(config: YouTubeConfig) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    /// Google consent URL; `app_url` is normalised to `https://host` and
    /// carried through in `state`
    pub fn authorization_url(&self, app_url: &str) -> ApiResult<String> {
        self.ensure_client_id()?;
        let state = normalize_app_url(app_url);
        Ok(format!(
            "{}?client_id={}&redirect_uri={}&scope={}&response_type=code&access_type=offline&prompt=consent&state={}",
            self.config.auth_uri,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&self.config.scopes.join(" ")),
            urlencoding::encode(&state),
        ))
    }

    pub async fn exchange_code(&self, auth_code: &str) -> ApiResult<OAuthTokens> {
        self.ensure_client_id()?;
        let response = self
            .client
            .post(&self.config.token_uri)
            .form(&[
                ("code", auth_code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        let tokens: OAuthTokens = check_status("token", response).await?.json().await?;
        info!("Exchanged authorization code for tokens");
        Ok(tokens)
    }

    /// New access token; Google omits the refresh token here so the old one is kept
    pub async fn refresh_access_token(&self, refresh_token: &str) -> ApiResult<OAuthTokens> {
        self.ensure_client_id()?;
        let response = self
            .client
            .post(&self.config.token_uri)
            .form(&[
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let mut tokens: OAuthTokens = check_status("token", response).await?.json().await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        debug!("Refreshed access token");
        Ok(tokens)
    }

    pub async fn get_channel_info(&self, tokens: &OAuthTokens) -> ApiResult<ChannelInfo> {
        let url = format!("{}/channels", self.config.api_base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&tokens.access_token)
            .query(&[("part", "snippet,statistics"), ("mine", "true")])
            .send()
            .await?;

        let list: ListResponse<ChannelItem> = check_status("channels", response).await?.json().await?;
        parse_channel(list)
    }

    /// Create a broadcast and an RTMP ingest stream, bind them, then apply
    /// tags and category to the broadcast's video
    pub async fn create_live_stream(
        &self,
        tokens: &OAuthTokens,
        request: &BroadcastRequest,
    ) -> ApiResult<LiveStreamInfo> {
        let broadcast_body = json!({
            "snippet": {
                "title": request.title,
                "description": request.description,
                "scheduledStartTime": request.scheduled_start.to_rfc3339(),
            },
            "status": {
                "privacyStatus": request.privacy.to_string(),
                "selfDeclaredMadeForKids": request.made_for_kids,
            },
            "contentDetails": {
                "enableAutoStart": true,
                "enableAutoStop": true,
            },
        });
        let response = self
            .client
            .post(format!("{}/liveBroadcasts", self.config.api_base_url))
            .bearer_auth(&tokens.access_token)
            .query(&[("part", "snippet,status,contentDetails")])
            .json(&broadcast_body)
            .send()
            .await?;
        let broadcast: IdResource = check_status("liveBroadcasts.insert", response).await?.json().await?;

        let stream_body = json!({
            "snippet": { "title": format!("{} ingest", request.title) },
            "cdn": {
                "ingestionType": "rtmp",
                "resolution": "variable",
                "frameRate": "variable",
            },
        });
        let response = self
            .client
            .post(format!("{}/liveStreams", self.config.api_base_url))
            .bearer_auth(&tokens.access_token)
            .query(&[("part", "snippet,cdn")])
            .json(&stream_body)
            .send()
            .await?;
        let stream: LiveStreamResource = check_status("liveStreams.insert", response).await?.json().await?;
        let (stream_key, ingest_url) = ingestion_details(&stream)?;

        let response = self
            .client
            .post(format!("{}/liveBroadcasts/bind", self.config.api_base_url))
            .bearer_auth(&tokens.access_token)
            .query(&[
                ("id", broadcast.id.as_str()),
                ("part", "id,contentDetails"),
                ("streamId", stream.id.as_str()),
            ])
            .send()
            .await?;
        check_status("liveBroadcasts.bind", response).await?;

        if !request.tags.is_empty() || request.category_id.is_some() {
            // The broadcast already exists; metadata is best effort
            if let Err(e) = self.update_video_metadata(tokens, &broadcast.id, request).await {
                warn!(broadcast_id = %broadcast.id, "Failed to set tags/category: {}", e);
            }
        }

        info!(broadcast_id = %broadcast.id, "Created live broadcast");
        Ok(LiveStreamInfo {
            stream_key,
            ingest_url,
            watch_url: format!("{}{}", WATCH_URL_BASE, broadcast.id),
            broadcast_id: broadcast.id,
            stream_id: stream.id,
        })
    }

    async fn update_video_metadata(
        &self,
        tokens: &OAuthTokens,
        video_id: &str,
        request: &BroadcastRequest,
    ) -> ApiResult<()> {
        let body = json!({
            "id": video_id,
            "snippet": {
                "title": request.title,
                "description": request.description,
                "tags": request.tags,
                "categoryId": request.category_id.clone().unwrap_or_else(|| "22".to_string()),
            },
        });
        let response = self
            .client
            .put(format!("{}/videos", self.config.api_base_url))
            .bearer_auth(&tokens.access_token)
            .query(&[("part", "snippet")])
            .json(&body)
            .send()
            .await?;
        check_status("videos.update", response).await?;
        Ok(())
    }

    fn ensure_client_id(&self) -> ApiResult<()> {
        if self.config.client_id.trim().is_empty() {
            return Err(ApiError::NotConfigured("youtube.client_id is empty".to_string()));
        }
        Ok(())
    }
}

/// `http://host/path` or bare `host` -> `https://host`
fn normalize_app_url(app_url: &str) -> String {
    let host = app_url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default();
    format!("https://{}", host)
}

async fn check_status(endpoint: &str, response: reqwest::Response) -> ApiResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
    })
}

fn parse_channel(list: ListResponse<ChannelItem>) -> ApiResult<ChannelInfo> {
    let item = list
        .items
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::missing_field("channels", "items"))?;
    let count = |value: Option<String>| value.and_then(|v| v.parse::<u64>().ok());

    Ok(ChannelInfo {
        channel_id: item.id,
        title: item.snippet.title,
        description: item.snippet.description,
        subscriber_count: count(item.statistics.subscriber_count),
        video_count: count(item.statistics.video_count),
        view_count: count(item.statistics.view_count),
    })
}

fn ingestion_details(stream: &LiveStreamResource) -> ApiResult<(String, String)> {
    let info = stream
        .cdn
        .as_ref()
        .and_then(|cdn| cdn.ingestion_info.as_ref())
        .ok_or_else(|| ApiError::missing_field("liveStreams.insert", "cdn.ingestionInfo"))?;
    let key = info
        .stream_name
        .clone()
        .ok_or_else(|| ApiError::missing_field("liveStreams.insert", "streamName"))?;
    let address = info
        .ingestion_address
        .clone()
        .ok_or_else(|| ApiError::missing_field("liveStreams.insert", "ingestionAddress"))?;
    Ok((key, address))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> YouTubeClient {
        YouTubeClient::new(YouTubeConfig {
            client_id: "1234.apps.googleusercontent.com".to_string(),
            client_secret: "shh".to_string(),
            redirect_uri: "https://auth.example.com/callback".to_string(),
            ..YouTubeConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_authorization_url_parameters() {
        let url = client().authorization_url("http://relay.example.com/some/page").unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let query: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert_eq!(query["client_id"], "1234.apps.googleusercontent.com");
        assert_eq!(query["redirect_uri"], "https://auth.example.com/callback");
        assert_eq!(query["scope"], "https://www.googleapis.com/auth/youtube.force-ssl");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["prompt"], "consent");
        assert_eq!(query["state"], "https://relay.example.com");
    }

    #[test]
    fn test_authorization_url_requires_client_id() {
        let client = YouTubeClient::new(YouTubeConfig::default()).unwrap();
        assert!(matches!(
            client.authorization_url("relay.example.com"),
            Err(ApiError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_tokens_from_query_param() {
        let encoded = "%7B%22access_token%22%3A%22ya29.a0AfH6SMBxxxxxxxxxxxxxxxxxxxx%22%2C%22refresh_token%22%3A%221%2F%2F0gabc%22%2C%22expires_in%22%3A3599%7D";
        let tokens = OAuthTokens::from_query_param(encoded).unwrap();
        assert_eq!(tokens.access_token, "ya29.a0AfH6SMBxxxxxxxxxxxxxxxxxxxx");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//0gabc"));
        assert_eq!(tokens.expires_in, Some(3599));

        assert!(matches!(
            OAuthTokens::from_query_param("not-json"),
            Err(ApiError::InvalidTokens(_))
        ));
    }

    #[test]
    fn test_token_debug_is_truncated() {
        let tokens = OAuthTokens {
            access_token: "ya29.0123456789abcdefghijklmnopqrstuvwxyz".to_string(),
            refresh_token: None,
            token_type: Some("Bearer".to_string()),
            expires_in: None,
            scope: None,
        };
        let debug = format!("{:?}", tokens);
        assert!(debug.contains("ya29.0123456789abcde..."));
        assert!(!debug.contains("vwxyz"));
    }

    #[test]
    fn test_parse_channel_statistics() {
        let list: ListResponse<ChannelItem> = serde_json::from_str(
            r#"{"items":[{"id":"UC123","snippet":{"title":"Lofi Radio","description":"beats"},
                "statistics":{"subscriberCount":"1200","videoCount":"42","viewCount":"99000"}}]}"#,
        )
        .unwrap();
        let info = parse_channel(list).unwrap();
        assert_eq!(info.channel_id, "UC123");
        assert_eq!(info.title, "Lofi Radio");
        assert_eq!(info.subscriber_count, Some(1200));
        assert_eq!(info.video_count, Some(42));
    }

    #[test]
    fn test_parse_channel_without_items() {
        let list: ListResponse<ChannelItem> = serde_json::from_str(r#"{"kind":"youtube#channelListResponse"}"#).unwrap();
        assert!(matches!(parse_channel(list), Err(ApiError::MissingField { .. })));
    }

    #[test]
    fn test_ingestion_details_and_target() {
        let stream: LiveStreamResource = serde_json::from_str(
            r#"{"id":"s1","cdn":{"ingestionType":"rtmp","ingestionInfo":{
                "streamName":"abcd-efgh-ijkl-mnop","ingestionAddress":"rtmp://a.rtmp.youtube.com/live2"}}}"#,
        )
        .unwrap();
        let (key, address) = ingestion_details(&stream).unwrap();
        let info = LiveStreamInfo {
            stream_key: key,
            ingest_url: address,
            broadcast_id: "b1".to_string(),
            stream_id: stream.id.clone(),
            watch_url: format!("{}b1", WATCH_URL_BASE),
        };
        assert_eq!(
            info.stream_target(),
            StreamTarget::ExplicitUrl("rtmp://a.rtmp.youtube.com/live2/abcd-efgh-ijkl-mnop".to_string())
        );
    }

    #[test]
    fn test_normalize_app_url() {
        assert_eq!(normalize_app_url("relay.example.com"), "https://relay.example.com");
        assert_eq!(normalize_app_url("https://relay.example.com/x"), "https://relay.example.com");
    }
}
