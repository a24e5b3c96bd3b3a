//! Directions provider capability and its HTTP implementation.

use anyhow::Result;
use itertools::Itertools;
use reqwest::Client;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::config::ProviderConfig;
use crate::error::RouteError;
use crate::gps_processor::Point;

#[derive(Clone, Debug, PartialEq)]
pub struct DirectionsRequest {
    pub origin: Point,
    pub destination: Point,
    pub waypoints: Vec<Point>,
}

impl DirectionsRequest {
    /// First point is the origin, last the destination, anything between is
    /// an intermediate waypoint. `None` for fewer than 2 points.
    pub fn of_points(points: &[Point]) -> Option<Self> {
        match points {
            [origin, waypoints @ .., destination] => Some(DirectionsRequest {
                origin: origin.clone(),
                destination: destination.clone(),
                waypoints: waypoints.to_vec(),
            }),
            _ => None,
        }
    }
}

/// Something that can snap a sequence of waypoints to roads. Returns the raw
/// response body; decoding is left to `directions_codec`.
pub trait DirectionsProvider: Send + Sync + 'static {
    fn request_route(
        &self,
        request: &DirectionsRequest,
    ) -> impl Future<Output = Result<String, RouteError>> + Send;
}

fn format_point(p: &Point) -> String {
    format!("{},{}", p.latitude, p.longitude)
}

pub struct HttpDirectionsProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpDirectionsProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(HttpDirectionsProvider { client, config })
    }

    fn query_params(&self, request: &DirectionsRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("origin", format_point(&request.origin)),
            ("destination", format_point(&request.destination)),
            ("mode", self.config.mode.clone()),
        ];
        if !request.waypoints.is_empty() {
            params.push((
                "waypoints",
                request.waypoints.iter().map(format_point).join("|"),
            ));
        }
        params.push(("key", self.config.api_key.clone()));
        params
    }
}

impl DirectionsProvider for HttpDirectionsProvider {
    async fn request_route(&self, request: &DirectionsRequest) -> Result<String, RouteError> {
        let start = Instant::now();
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&self.query_params(request))
            .send()
            .await
            .map_err(|e| RouteError::Provider {
                message: format!("Request error: {}", e),
                status_code: e.status().map(|s| s.as_u16()),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("[directions] HTTP {} after {:?}", status, start.elapsed());
            return Err(RouteError::Provider {
                message: format!("HTTP {}", status),
                status_code: Some(status.as_u16()),
            });
        }

        let body = response.text().await.map_err(|e| RouteError::Provider {
            message: format!("Failed to read body: {}", e),
            status_code: Some(status.as_u16()),
        })?;
        debug!(
            "[directions] {} waypoints, {} bytes in {:?}",
            request.waypoints.len() + 2,
            body.len(),
            start.elapsed()
        );
        Ok(body)
    }
}
