//! Trending: reduce stored objects to numbers and follow them in time.
//!
//! Customization:
//!
//! ```yaml
//! customization:
//!   resumeTrend: true
//!   dataSources:
//!     - { path: "TST/MO/rate", name: "h", reductor: "mean", trendName: "trend" }
//! ```
//!
//! Each data source owns one graph whose points are
//! `(trigger time in seconds, reduced value)`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::models::{Activity, Graph, Payload, PostProcessingConfig, PublicationPolicy, Trigger};
use crate::domain::ports::{PostProcessingContext, PostProcessingInterface};

/// Reduction of an object to a single number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Reductor {
    Mean,
    StdDev,
    Entries,
    Integral,
}

impl Reductor {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::StdDev => "stddev",
            Self::Entries => "entries",
            Self::Integral => "integral",
        }
    }

    /// Reduce a payload, `None` when the payload has no such quantity.
    pub fn reduce(&self, payload: &Payload) -> Option<f64> {
        if let Payload::Graph(graph) = payload {
            return match self {
                Self::Mean => Some(graph.mean_y()),
                Self::Entries => Some(graph.len() as f64),
                Self::StdDev | Self::Integral => None,
            };
        }
        if let Payload::Histogram2D(histogram) = payload {
            return match self {
                Self::Entries => Some(histogram.entries()),
                Self::Integral => Some(histogram.integral()),
                Self::Mean | Self::StdDev => None,
            };
        }
        let histogram = payload.histogram1d_view()?;
        Some(match self {
            Self::Mean => histogram.mean(),
            Self::StdDev => histogram.std_dev(),
            Self::Entries => histogram.entries(),
            Self::Integral => histogram.integral(),
        })
    }
}

impl fmt::Display for Reductor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reductor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "stddev" | "std_dev" => Ok(Self::StdDev),
            "entries" => Ok(Self::Entries),
            "integral" => Ok(Self::Integral),
            other => Err(format!("unknown reductor '{other}'")),
        }
    }
}

impl TryFrom<String> for Reductor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Reductor> for String {
    fn from(value: Reductor) -> Self {
        value.as_str().to_string()
    }
}

/// One object to trend and how to reduce it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSource {
    /// Object path, e.g. `TST/MO/rate`
    pub path: String,
    /// Object name
    pub name: String,
    /// Reduction applied to each version; defaults to `mean`
    #[serde(default = "default_reductor")]
    pub reductor: Reductor,
    /// Name of the output series; `<name>_<reductor>` when unset
    #[serde(default)]
    pub trend_name: Option<String>,
}

const fn default_reductor() -> Reductor {
    Reductor::Mean
}

impl TrendSource {
    /// Output series name.
    pub fn trend_name(&self) -> String {
        self.trend_name
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.name, self.reductor))
    }
}

/// `taskParameters` of the trending task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingSettings {
    /// Objects to trend
    #[serde(default)]
    pub data_sources: Vec<TrendSource>,
    /// Continue the series already stored instead of starting empty
    #[serde(default)]
    pub resume_trend: bool,
}

/// Postprocessing task appending reduced values of stored objects to trend graphs
#[derive(Debug, Default)]
pub struct TrendingTask {
    name: String,
    detector: String,
    settings: TrendingSettings,
}

impl TrendingTask {
    /// Where this task's own objects are stored
    fn own_path(&self) -> String {
        format!("{}/MO/{}", self.detector, self.name)
    }

    async fn resumed_graph(&self, trend: &str, ctx: &PostProcessingContext) -> Option<Graph> {
        let stored = match ctx
            .services
            .database()
            .retrieve_mo(&self.own_path(), trend, None, &Activity::any())
            .await
        {
            Ok(stored) => stored?,
            Err(err) => {
                warn!(task = %self.name, trend, error = %err, "could not retrieve previous trend");
                return None;
            }
        };
        match stored.into_payload() {
            Payload::Graph(graph) => Some(graph),
            other => {
                warn!(task = %self.name, trend, kind = %other.kind(), "stored trend is not a graph, starting anew");
                None
            }
        }
    }
}

#[async_trait]
impl PostProcessingInterface for TrendingTask {
    fn configure(&mut self, name: &str, config: &PostProcessingConfig) -> anyhow::Result<()> {
        self.name = name.to_string();
        self.detector.clone_from(&config.detector_name);
        self.settings = if config.customization.is_null() {
            TrendingSettings::default()
        } else {
            serde_json::from_value(config.customization.clone())?
        };
        if self.settings.data_sources.is_empty() {
            anyhow::bail!("trending task '{name}' has no data sources");
        }
        Ok(())
    }

    async fn initialize(&mut self, _trigger: &Trigger, ctx: &mut PostProcessingContext) -> anyhow::Result<()> {
        for source in &self.settings.data_sources {
            let trend = source.trend_name();
            let graph = if self.settings.resume_trend {
                self.resumed_graph(&trend, ctx).await
            } else {
                None
            };
            let graph = match graph {
                Some(graph) => {
                    info!(task = %self.name, trend = %trend, points = graph.len(), "resuming trend");
                    graph
                }
                None => {
                    let mut graph = Graph::new(trend.clone());
                    graph.title = format!("{} of {}/{}", source.reductor, source.path, source.name);
                    graph
                }
            };
            ctx.objects.start_publishing(graph, PublicationPolicy::Forever)?;
        }
        Ok(())
    }

    async fn update(&mut self, trigger: &Trigger, ctx: &mut PostProcessingContext) -> anyhow::Result<()> {
        let filter = Activity {
            number: trigger.activity.number,
            ..Activity::any()
        };
        let database = ctx.services.database().clone();
        let x = trigger.timestamp.timestamp_millis() as f64 / 1000.0;

        for source in &self.settings.data_sources {
            let Some(object) = database
                .retrieve_mo(&source.path, &source.name, Some(trigger.timestamp), &filter)
                .await?
            else {
                warn!(task = %self.name, path = %source.path, name = %source.name, "object not found, skipping");
                continue;
            };
            let Some(value) = source.reductor.reduce(object.payload()) else {
                warn!(
                    task = %self.name,
                    object = %object.full_path(),
                    reductor = %source.reductor,
                    "object cannot be reduced, skipping"
                );
                continue;
            };
            let trend = source.trend_name();
            if let Payload::Graph(graph) = ctx.objects.payload_mut(&trend)? {
                graph.add_point(x, value);
                debug!(task = %self.name, trend = %trend, x, value, "appended trend point");
            }
        }
        Ok(())
    }

    async fn finalize(&mut self, trigger: &Trigger, ctx: &mut PostProcessingContext) -> anyhow::Result<()> {
        self.update(trigger, ctx).await
    }
}
