use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, TidepoolError};

const LIVE_API_URL: &str = "https://api-fxtrade.oanda.com";
const PRACTICE_API_URL: &str = "https://api-fxpractice.oanda.com";
const LIVE_STREAM_URL: &str = "https://stream-fxtrade.oanda.com";
const PRACTICE_STREAM_URL: &str = "https://stream-fxpractice.oanda.com";

/// One upstream subaccount.
#[derive(Clone, Debug, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// A tradeable symbol available to an account.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Client for the upstream pricing API (REST account/instrument lookups
/// plus the long-lived streaming endpoint).
pub struct OandaClient {
    http: reqwest::Client,
    token: String,
    api_url: String,
    stream_url: String,
}

impl OandaClient {
    pub fn new(token: impl Into<String>, live: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("tidepool/0.1")
            .build()
            .map_err(|e| TidepoolError::Upstream(e.to_string()))?;

        let (api_url, stream_url) = if live {
            (LIVE_API_URL, LIVE_STREAM_URL)
        } else {
            (PRACTICE_API_URL, PRACTICE_STREAM_URL)
        };

        Ok(Self {
            http,
            token: token.into(),
            api_url: api_url.to_string(),
            stream_url: stream_url.to_string(),
        })
    }

    /// GET a JSON payload, surfacing the upstream `errorMessage` when the
    /// API returns one instead of the expected document.
    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| TidepoolError::Upstream(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| TidepoolError::Upstream(e.to_string()))?;

        if let Some(message) = payload.get("errorMessage").and_then(Value::as_str) {
            return Err(TidepoolError::Upstream(message.to_string()));
        }

        Ok(payload)
    }

    /// List the subaccounts visible to this token.
    pub async fn accounts(&self) -> Result<Vec<Account>> {
        let listing = self.get_json(&format!("{}/v3/accounts", self.api_url)).await?;
        let summaries: Vec<Account> =
            serde_json::from_value(listing.get("accounts").cloned().unwrap_or_default())?;

        // The listing only carries ids; fetch each account for its alias.
        let mut accounts = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let detail = self
                .get_json(&format!("{}/v3/accounts/{}", self.api_url, summary.id))
                .await?;
            let account: Account =
                serde_json::from_value(detail.get("account").cloned().unwrap_or_default())?;
            accounts.push(account);
        }

        Ok(accounts)
    }

    /// Find the subaccount with the given alias.
    pub async fn account_by_alias(&self, alias: &str) -> Result<Account> {
        self.accounts()
            .await?
            .into_iter()
            .find(|account| account.alias.as_deref() == Some(alias))
            .ok_or_else(|| TidepoolError::Upstream(format!("no account with alias '{alias}'")))
    }

    /// List the instruments available to an account.
    pub async fn instruments(&self, account_id: &str) -> Result<Vec<Instrument>> {
        let payload = self
            .get_json(&format!(
                "{}/v3/accounts/{}/instruments",
                self.api_url, account_id
            ))
            .await?;

        Ok(serde_json::from_value(
            payload.get("instruments").cloned().unwrap_or_default(),
        )?)
    }

    /// Open the streaming pricing endpoint for the given instruments.
    ///
    /// The returned stream yields each non-empty line of the response body
    /// as it arrives and ends cleanly when the server closes the
    /// connection. Dropping it closes the connection.
    pub async fn stream_prices(
        &self,
        account_id: &str,
        instruments: &[String],
    ) -> Result<PriceStream> {
        let url = format!(
            "{}/v3/accounts/{}/pricing/stream",
            self.stream_url, account_id
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("instruments", instruments.join(","))])
            .send()
            .await
            .map_err(|e| TidepoolError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TidepoolError::Upstream(format!(
                "pricing stream returned {}",
                response.status()
            )));
        }

        let body = response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()));

        Ok(PriceStream {
            body: Box::pin(body),
            lines: LineBuffer::default(),
        })
    }
}

/// Lazy sequence of newline-delimited frames from the pricing stream.
pub struct PriceStream {
    body: Pin<Box<dyn Stream<Item = std::result::Result<Vec<u8>, reqwest::Error>> + Send>>,
    lines: LineBuffer,
}

impl PriceStream {
    /// Next non-empty line, or `None` once the upstream closes the stream.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.lines.pop_line() {
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.lines.extend(&chunk),
                Some(Err(e)) => return Err(TidepoolError::Upstream(e.to_string())),
                None => {
                    let tail = self.lines.take_remainder();
                    return Ok(if tail.is_empty() { None } else { Some(tail) });
                }
            }
        }
    }
}

/// Reassembles newline-delimited lines out of arbitrary chunk boundaries.
#[derive(Default)]
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete line, without its terminator. Returns `None`
    /// while the buffer holds only a partial line.
    fn pop_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever remains after the final newline, consumed.
    fn take_remainder(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned()
    }
}
