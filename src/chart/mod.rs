use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use topic_atlas_include_zstd::include_zstd;
use tracing::{debug, info};

use crate::table::{TopicRow, TopicTable};
use crate::template::Template;
use crate::topics::OUTLIER;
use crate::{AppError, AppResult};

static CHART_TEMPLATE: &[u8] = include_zstd!("src/chart/template.html");

/// Characters of document text shown in a hover box.
pub const HOVER_TEXT_CHARS: usize = 80;

static DEFAULT_TITLE: &str = "Topic map";
static OUTLIER_NAME: &str = "outliers";
static HIGHLIGHT_NAME: &str = "highlight";

/// A Plotly figure: traces plus layout, serialised as the JSON `Plotly.newPlot` expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub data: Vec<Trace>,
    pub layout: Layout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(rename = "type")]
    pub kind: String,
    pub mode: String,
    pub name: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub text: Vec<String>,
    pub hoverinfo: String,
    pub marker: Marker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub size: f64,
    pub opacity: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub line: Option<MarkerLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerLine {
    pub width: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub title: Title,
    pub hovermode: String,
    pub showlegend: bool,
    pub xaxis: AxisLayout,
    pub yaxis: AxisLayout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Title {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisLayout {
    pub showgrid: bool,
    pub zeroline: bool,
    pub showticklabels: bool,
}

impl Default for AxisLayout {
    fn default() -> Self {
        Self {
            showgrid: false,
            zeroline: false,
            showticklabels: false,
        }
    }
}

impl Trace {
    fn scatter(name: String, marker: Marker) -> Self {
        Self {
            kind: "scattergl".into(),
            mode: "markers".into(),
            name,
            x: Vec::new(),
            y: Vec::new(),
            text: Vec::new(),
            hoverinfo: "text".into(),
            marker,
        }
    }

    fn push(&mut self, row: &TopicRow) {
        self.x.push(row.x);
        self.y.push(row.y);
        self.text.push(hover_text(row));
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

impl Chart {
    pub fn trace(&self, name: &str) -> Option<&Trace> {
        self.data.iter().find(|t| t.name == name)
    }

    /// Points drawn on top of the topic traces for the requested label, if any matched.
    pub fn highlight(&self) -> Option<&Trace> {
        self.trace(HIGHLIGHT_NAME)
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Standalone HTML page that draws the chart with Plotly.
    #[tracing::instrument(name = "Rendering chart page", level = "debug", skip(self))]
    pub fn to_html(&self) -> AppResult<String> {
        let template = Template::from_zstd(CHART_TEMPLATE)?;
        // The figure is inlined in a <script> element.
        let figure = self.to_json()?.replace("</", "<\\/");
        let title = escape_html(&self.layout.title.text);
        let vars = HashMap::from([("title", title.as_str()), ("figure", figure.as_str())]);
        Ok(template.render(&vars))
    }
}

/// Builds interactive scatter charts from a [`TopicTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterChart {
    pub title: String,
    pub point_size: f64,
}

impl Default for ScatterChart {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.into(),
            point_size: 6.0,
        }
    }
}

impl ScatterChart {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// One trace per topic, plus a highlight trace for rows whose label equals
    /// `label_to_view` exactly. No matching row means no highlight trace.
    #[tracing::instrument(name = "Building chart", level = "info", skip(self, table))]
    pub fn view(&self, table: &TopicTable, label_to_view: Option<&str>) -> AppResult<Chart> {
        if table.is_empty() {
            return Err(AppError::EmptyTable);
        }

        let mut by_topic: BTreeMap<i32, Trace> = BTreeMap::new();
        for row in table {
            by_topic
                .entry(row.topic)
                .or_insert_with(|| self.topic_trace(row.topic))
                .push(row);
        }
        let mut data: Vec<Trace> = by_topic.into_values().collect();

        if let Some(label) = label_to_view {
            let mut highlight = Trace::scatter(
                HIGHLIGHT_NAME.into(),
                Marker {
                    size: self.point_size * 2.0,
                    opacity: 1.0,
                    color: Some("gold".into()),
                    line: Some(MarkerLine {
                        width: 2.0,
                        color: "black".into(),
                    }),
                },
            );
            for row in table.iter().filter(|r| r.label == label) {
                highlight.push(row);
            }
            if highlight.is_empty() {
                info!("No document is labelled {:?}; nothing to highlight", label);
            } else {
                debug!("Highlighting {} documents", highlight.len());
                data.push(highlight);
            }
        }

        Ok(Chart {
            data,
            layout: Layout {
                title: Title {
                    text: self.title.clone(),
                },
                hovermode: "closest".into(),
                showlegend: true,
                xaxis: AxisLayout::default(),
                yaxis: AxisLayout::default(),
            },
        })
    }

    fn topic_trace(&self, topic: i32) -> Trace {
        if topic == OUTLIER {
            Trace::scatter(
                OUTLIER_NAME.into(),
                Marker {
                    size: self.point_size,
                    opacity: 0.4,
                    color: Some("lightgrey".into()),
                    line: None,
                },
            )
        } else {
            Trace::scatter(
                format!("topic {topic}"),
                Marker {
                    size: self.point_size,
                    opacity: 0.8,
                    color: None,
                    line: None,
                },
            )
        }
    }
}

fn hover_text(row: &TopicRow) -> String {
    let flat = row.text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut snippet: String = flat.chars().take(HOVER_TEXT_CHARS).collect();
    if flat.chars().count() > HOVER_TEXT_CHARS {
        snippet.push_str("...");
    }
    format!("{}<br>{}", escape_html(&row.label), escape_html(&snippet))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(text: &str, topic: i32, label: &str, x: f64) -> TopicRow {
        TopicRow {
            text: text.into(),
            topic,
            label: label.into(),
            x,
            y: -x,
        }
    }

    fn table() -> TopicTable {
        TopicTable {
            rows: vec![
                row("first", 0, "alpha", 0.0),
                row("second", 1, "beta", 1.0),
                row("third", 0, "alpha", 2.0),
                row("fourth", OUTLIER, "gamma", 3.0),
                row("fifth", 1, "beta", 4.0),
            ],
        }
    }

    #[test]
    fn one_trace_per_topic() {
        let chart = ScatterChart::default().view(&table(), None).unwrap();
        let names: Vec<&str> = chart.data.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["outliers", "topic 0", "topic 1"]);
        let total: usize = chart.data.iter().map(Trace::len).sum();
        assert_eq!(total, 5);
        assert_eq!(chart.trace("topic 0").unwrap().x, vec![0.0, 2.0]);
        assert_eq!(chart.trace("topic 0").unwrap().y, vec![0.0, -2.0]);
        assert!(chart.highlight().is_none());
    }

    #[test]
    fn highlight_is_drawn_last_and_keeps_every_point() {
        let chart = ScatterChart::default()
            .view(&table(), Some("beta"))
            .unwrap();
        let last = chart.data.last().unwrap();
        assert_eq!(last.name, "highlight");
        assert_eq!(last.x, vec![1.0, 4.0]);
        let topic_points: usize = chart.data[..chart.data.len() - 1]
            .iter()
            .map(Trace::len)
            .sum();
        assert_eq!(topic_points, 5);
    }

    #[test]
    fn highlight_uses_exact_match() {
        let chart = ScatterChart::default()
            .view(&table(), Some("bet"))
            .unwrap();
        assert!(chart.highlight().is_none());
        assert_eq!(chart.data.len(), 3);
    }

    #[test]
    fn empty_table_is_an_error() {
        assert!(matches!(
            ScatterChart::default().view(&TopicTable::default(), Some("x")),
            Err(AppError::EmptyTable)
        ));
    }

    #[test]
    fn hover_text_is_truncated_and_labelled() {
        let long = "word ".repeat(40);
        let text = hover_text(&row(&long, 0, "<label>", 0.0));
        let (label, snippet) = text.split_once("<br>").unwrap();
        assert_eq!(label, "&lt;label&gt;");
        assert_eq!(snippet.chars().count(), HOVER_TEXT_CHARS + 3);
        assert!(snippet.ends_with("..."));

        let short = hover_text(&row("short\ntext", 0, "l", 0.0));
        assert_eq!(short, "l<br>short text");
    }

    #[test]
    fn figure_json_uses_plotly_names() {
        let chart = ScatterChart::new("My map").view(&table(), None).unwrap();
        let json: serde_json::Value = serde_json::from_str(&chart.to_json().unwrap()).unwrap();
        assert_eq!(json["data"][0]["type"], "scattergl");
        assert_eq!(json["data"][0]["mode"], "markers");
        assert_eq!(json["layout"]["title"]["text"], "My map");
        assert!(json["data"][1]["marker"].get("line").is_none());
    }

    #[test]
    fn html_page_embeds_the_figure() {
        let mut t = table();
        t.rows[0].text = "</script><b>".into();
        let chart = ScatterChart::new("A & B").view(&t, Some("alpha")).unwrap();
        let html = chart.to_html().unwrap();
        assert!(html.contains("<title>A &amp; B</title>"));
        assert!(html.contains("\"type\":\"scattergl\""));
        assert!(html.contains("Plotly.newPlot"));
        assert!(!html.contains("{{figure}}"));
        assert_eq!(html.matches("</script>").count(), 2);
    }
}
