//! Some helper functions for HTTP calls
use std::{error, fmt, time::Duration};

use reqwest::blocking::{Client, ClientBuilder, Response};
use reqwest::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT,
};
use reqwest::StatusCode;
use serde::Serialize;

use crate::constants::CERTDEPOT_VERSION;

const JSON_CONTENT: &str = "application/json";

/// Creates a blocking client that gives up after `timeout`.
///
/// The timeout covers the whole exchange, from connecting until the
/// response body has been read.
#[allow(clippy::result_large_err)]
pub fn client(uri: &str, timeout: Duration) -> Result<Client, Error> {
    ClientBuilder::new()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::request_build(uri, e))
}

/// Performs a POST of data that can be serialized into json, authorized
/// with a bearer token, and expects a 200 OK response. Any body of the
/// response is ignored.
#[allow(clippy::result_large_err)]
pub fn post_json_with_bearer(
    client: &Client,
    uri: &str,
    data: impl Serialize,
    token: &str,
) -> Result<(), Error> {
    let body = serde_json::to_string(&data)
        .map_err(|e| Error::request_build_json(uri, e))?;

    let headers = headers(uri, Some(JSON_CONTENT), Some(token))?;

    let res = client
        .post(uri)
        .headers(headers)
        .body(body)
        .send()
        .map_err(|e| Error::execute(uri, e))?;

    match res.status() {
        StatusCode::OK => Ok(()),
        _ => Err(Error::from_res(uri, res)),
    }
}

#[allow(clippy::result_large_err)]
fn headers(
    uri: &str,
    content_type: Option<&str>,
    token: Option<&str>,
) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    let ua_string = format!("certdepot/{CERTDEPOT_VERSION}");
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&ua_string)
            .map_err(|e| Error::request_build(uri, e))?,
    );

    if let Some(content_type) = content_type {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .map_err(|e| Error::request_build(uri, e))?,
        );
    }
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            // Do not echo the token in the error.
            .map_err(|_| Error::request_build(uri, "invalid bearer token"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}


//------------ Error ---------------------------------------------------------

type ErrorUri = String;
type ErrorMessage = String;

#[derive(Debug)]
pub enum Error {
    RequestBuild(ErrorUri, ErrorMessage),
    RequestExecute(ErrorUri, ErrorMessage),
    Response(ErrorUri, ErrorMessage),
    ErrorResponseWithBody(ErrorUri, StatusCode, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::RequestBuild(uri, msg) => {
                write!(f,
                    "Issue creating request for URI: {uri}, error: {msg}"
                )
            }
            Error::RequestExecute(uri, msg) => {
                write!(f, "Issue accessing URI: {uri}, error: {msg}")
            }
            Error::Response(uri, msg) => {
                write!(f,
                    "Issue processing response from URI: {uri}, \
                     error: {msg}"
                )
            }
            Error::ErrorResponseWithBody(uri, code, e) => {
                write!(f,
                    "Error response from URI: {uri}, Status: {code}, \
                     Error: {e}"
                )
            }
        }
    }
}

impl Error {
    pub fn request_build(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), msg.to_string())
    }

    pub fn request_build_json(uri: &str, e: impl fmt::Display) -> Self {
        Error::RequestBuild(
            uri.to_string(),
            format!("could not serialize type to JSON: {e}")
        )
    }

    pub fn execute(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestExecute(uri.to_string(), msg.to_string())
    }

    pub fn response(uri: &str, msg: impl fmt::Display) -> Self {
        Error::Response(uri.to_string(), msg.to_string())
    }

    pub fn unexpected_status(status: StatusCode) -> String {
        format!("unexpected status code {status}")
    }

    pub fn response_unexpected_status(uri: &str, status: StatusCode) -> Self {
        Error::Response(uri.to_string(), Self::unexpected_status(status))
    }

    /// Returns the status code of an error response, if there was one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::ErrorResponseWithBody(_, status, _) => Some(*status),
            _ => None,
        }
    }

    /// Returns the body of an error response, if there was one.
    pub fn body(&self) -> Option<&str> {
        match self {
            Error::ErrorResponseWithBody(_, _, body) => Some(body),
            _ => None,
        }
    }

    fn from_res(uri: &str, res: Response) -> Error {
        let status = res.status();
        match res.text() {
            Ok(body) => {
                if body.is_empty() {
                    Self::response_unexpected_status(uri, status)
                } else {
                    Error::ErrorResponseWithBody(uri.to_string(), status, body)
                }
            }
            _ => Self::response_unexpected_status(uri, status),
        }
    }
}

impl error::Error for Error {}


//------------ Tests ---------------------------------------------------------
