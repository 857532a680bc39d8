use askama::Template;
use chrono::NaiveDateTime;
use common::{
    led::LedState,
    req::{ChartPoint, ClimatePoint},
};
use serde::Serialize;

use crate::db::{ClimateRow, ResultSet, TelemetryRow};
use crate::relay::CommandResult;

const TIMESTAMP_COLUMNS: [&str; 2] = ["ts", "received_at"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavLink {
    pub href: String,
    pub title: String,
}

/// Display strings of one dashboard row.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryCells {
    pub time: String,
    pub sender: String,
    pub recipient: String,
    pub portnum: String,
    pub temperature: String,
    pub humidity: String,
    pub led1: &'static str,
    pub led2: &'static str,
}

impl From<&TelemetryRow> for TelemetryCells {
    fn from(row: &TelemetryRow) -> Self {
        Self {
            time: format_time(&row.time),
            sender: row.sender.clone().unwrap_or_default(),
            recipient: row.recipient.clone().unwrap_or_default(),
            portnum: row.portnum.clone().unwrap_or_default(),
            temperature: optional_number(row.temperature),
            humidity: optional_number(row.humidity),
            led1: LedState::from(row.led1.as_deref()).label(),
            led2: LedState::from(row.led2.as_deref()).label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    pub payload: String,
    pub output: String,
}

impl From<&CommandResult> for CommandStatus {
    fn from(result: &CommandResult) -> Self {
        Self {
            payload: result.payload_sent.clone(),
            output: result
                .relay_output()
                .map(str::to_owned)
                .unwrap_or_else(|| result.outcome.display_text()),
        }
    }
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardPage<'a> {
    pub nav: &'a [NavLink],
    pub view: &'a str,
    pub rows: Vec<TelemetryCells>,
    pub latest: Option<TelemetryCells>,
    pub command: Option<CommandStatus>,
    pub chart_json: Option<String>,
}

impl<'a> DashboardPage<'a> {
    pub fn new(
        nav: &'a [NavLink],
        view: &'a str,
        history: &[TelemetryRow],
        command: Option<&CommandResult>,
    ) -> serde_json::Result<Self> {
        let rows = history.iter().map(TelemetryCells::from).collect::<Vec<_>>();
        let chart_json = if history.is_empty() {
            None
        } else {
            Some(script_json(&chart_points(history))?)
        };

        Ok(Self {
            nav,
            view,
            latest: rows.last().cloned(),
            rows,
            command: command.map(CommandStatus::from),
            chart_json,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub class: &'static str,
}

#[derive(Template)]
#[template(path = "viewer.html")]
pub struct ViewerPage<'a> {
    pub nav: &'a [NavLink],
    pub title: &'a str,
    pub description: &'a str,
    pub columns: &'a [String],
    pub rows: Vec<Vec<Cell>>,
}

impl<'a> ViewerPage<'a> {
    pub fn new(nav: &'a [NavLink], title: &'a str, description: &'a str, set: &'a ResultSet) -> Self {
        let rows = set
            .rows
            .iter()
            .map(|record| {
                record
                    .iter()
                    .map(|field| Cell {
                        text: field.value.clone().unwrap_or_default(),
                        class: if TIMESTAMP_COLUMNS.contains(&field.name.as_str()) {
                            "timestamp-col"
                        } else {
                            ""
                        },
                    })
                    .collect()
            })
            .collect();

        Self {
            nav,
            title,
            description,
            columns: &set.columns,
            rows,
        }
    }
}

#[derive(Template)]
#[template(path = "graphs.html")]
pub struct GraphsPage<'a> {
    pub nav: &'a [NavLink],
    pub points_json: Option<String>,
}

impl<'a> GraphsPage<'a> {
    pub fn new(nav: &'a [NavLink], history: &[ClimateRow]) -> serde_json::Result<Self> {
        let points_json = if history.is_empty() {
            None
        } else {
            let points = history
                .iter()
                .map(|row| ClimatePoint {
                    time: format_time(&row.time),
                    temperature: row.temperature,
                    humidity: row.humidity,
                })
                .collect::<Vec<_>>();
            Some(script_json(&points)?)
        };

        Ok(Self { nav, points_json })
    }
}

pub fn chart_points(history: &[TelemetryRow]) -> Vec<ChartPoint> {
    history
        .iter()
        .map(|row| {
            ChartPoint::new(
                format_time(&row.time),
                row.temperature,
                row.humidity,
                LedState::from(row.led1.as_deref()),
                LedState::from(row.led2.as_deref()),
            )
        })
        .collect()
}

/// Same text form PostgreSQL prints for a `timestamp`.
pub fn format_time(time: &NaiveDateTime) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn optional_number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// JSON that can be pasted into a `<script>` element as-is.
pub fn script_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    Ok(serde_json::to_string(value)?
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Field;
    use crate::relay::RelayOutcome;
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn row(hour: u32, led1: Option<&str>, led2: Option<&str>) -> TelemetryRow {
        TelemetryRow {
            time: at(hour),
            sender: Some("!a1b2c3d4".to_owned()),
            recipient: Some("^all".to_owned()),
            portnum: Some("TEXT_MESSAGE_APP".to_owned()),
            temperature: Some(21.5),
            humidity: Some(40.0),
            led1: led1.map(str::to_owned),
            led2: led2.map(str::to_owned),
        }
    }

    fn nav() -> Vec<NavLink> {
        vec![NavLink {
            href: "/".to_owned(),
            title: "Dashboard".to_owned(),
        }]
    }

    #[test]
    fn led_cells() {
        let on = TelemetryCells::from(&row(1, Some("t"), Some("f")));
        assert_eq!((on.led1, on.led2), ("On", "Off"));

        let unknown = TelemetryCells::from(&row(1, None, None));
        assert_eq!((unknown.led1, unknown.led2), ("", ""));
    }

    #[test]
    fn odd_led_text_is_blank_and_unplotted() {
        let odd = row(1, Some("x"), Some(""));
        let cells = TelemetryCells::from(&odd);
        assert_eq!((cells.led1, cells.led2), ("", ""));

        let points = chart_points(&[odd]);
        assert_eq!((points[0].led1, points[0].led2), (None, None));
    }

    #[test]
    fn null_cells_are_empty() {
        let mut r = row(1, None, None);
        r.sender = None;
        r.temperature = None;
        let cells = TelemetryCells::from(&r);
        assert_eq!(cells.sender, "");
        assert_eq!(cells.temperature, "");
        assert_eq!(cells.humidity, "40");
        assert_eq!(cells.time, "2025-01-01 01:00:00");
    }

    #[test]
    fn chart_levels_follow_led_state() {
        let points = chart_points(&[
            row(1, Some("t"), Some("f")),
            row(2, None, Some("t")),
        ]);
        assert_eq!(points.len(), 2);
        assert_eq!((points[0].led1, points[0].led2), (Some(1), Some(0)));
        assert_eq!((points[1].led1, points[1].led2), (None, Some(1)));
        assert_eq!(points[1].time, "2025-01-01 02:00:00");
    }

    #[test]
    fn script_json_cannot_close_the_script() {
        let json = script_json(&["</script><script>alert(1)</script>&"]).unwrap();
        assert!(!json.contains('<'));
        assert!(!json.contains('>'));
        assert!(!json.contains('&'));
        let back: Vec<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[0], "</script><script>alert(1)</script>&");
    }

    #[test]
    fn empty_dashboard_has_placeholder_and_no_chart() {
        let nav = nav();
        let page = DashboardPage::new(&nav, "messages_temp_humidity_led", &[], None).unwrap();
        assert!(page.chart_json.is_none());
        assert!(page.latest.is_none());

        let html = page.render().unwrap();
        assert!(html.contains(r#"<td colspan="8">No data available.</td>"#));
        assert!(!html.contains("new Chart("));
        assert!(!html.contains("Latest received telemetry"));
    }

    #[test]
    fn dashboard_renders_rows_latest_and_chart() {
        let nav = nav();
        let history = [row(1, Some("t"), None), row(2, Some("f"), Some("t"))];
        let page = DashboardPage::new(&nav, "messages_temp_humidity_led", &history, None).unwrap();

        assert_eq!(page.latest.as_ref().unwrap().time, "2025-01-01 02:00:00");
        let html = page.render().unwrap();
        assert!(html.contains("new Chart("));
        assert!(html.contains(r#""led1":1"#));
        assert!(html.contains("Latest received telemetry"));
        assert!(!html.contains("No data available."));
        assert!(!html.contains("Last packet"));
        assert_eq!(html.matches("<td>TEXT_MESSAGE_APP</td>").count(), 2);
    }

    #[test]
    fn dashboard_shows_command_status() {
        let nav = nav();
        let result = CommandResult {
            payload_sent: r#"{"led1":true,"led2":false}"#.to_owned(),
            outcome: RelayOutcome::Succeeded {
                output: String::new(),
            },
        };
        let html = DashboardPage::new(&nav, "v", &[], Some(&result))
            .unwrap()
            .render()
            .unwrap();

        assert!(html.contains("Last packet"));
        assert!(html.contains("led1"));
        assert!(html.contains("Meshtastic CLI did not return any output."));
        assert!(html.contains("No data available."));
    }

    #[test]
    fn dashboard_escapes_values() {
        let nav = nav();
        let mut evil = row(1, None, None);
        evil.sender = Some("<script>alert(1)</script>".to_owned());
        let html = DashboardPage::new(&nav, "v", &[evil], None)
            .unwrap()
            .render()
            .unwrap();

        assert!(!html.contains("<script>alert(1)"));
        assert!(html.contains("&lt;script&gt;alert(1)"));
    }

    fn result_set() -> ResultSet {
        let columns = vec!["ts".to_owned(), "sender".to_owned(), "message".to_owned()];
        let record = |ts: &str, message: Option<&str>| {
            vec![
                Field {
                    name: "ts".to_owned(),
                    value: Some(ts.to_owned()),
                },
                Field {
                    name: "sender".to_owned(),
                    value: Some("!a1b2c3d4".to_owned()),
                },
                Field {
                    name: "message".to_owned(),
                    value: message.map(str::to_owned),
                },
            ]
        };
        ResultSet {
            columns,
            rows: vec![
                record("2025-01-01T02:00:00", Some("<script>alert(1)</script>")),
                record("2025-01-01T01:00:00", None),
            ],
        }
    }

    #[test]
    fn viewer_keeps_order_and_column_count() {
        let nav = nav();
        let set = result_set();
        let page = ViewerPage::new(&nav, "messages_clean", "", &set);

        assert_eq!(page.rows.len(), 2);
        assert!(page.rows.iter().all(|r| r.len() == set.columns.len()));
        assert_eq!(page.rows[0][0].text, "2025-01-01T02:00:00");
        assert_eq!(page.rows[0][0].class, "timestamp-col");
        assert_eq!(page.rows[0][1].class, "");
        assert_eq!(page.rows[1][2].text, "");

        let html = page.render().unwrap();
        let first = html.find("2025-01-01T02:00:00").unwrap();
        let second = html.find("2025-01-01T01:00:00").unwrap();
        assert!(first < second);
        assert!(html.contains("<th>ts</th>"));
        assert!(html.contains("<th>message</th>"));
        assert!(!html.contains("<script>alert(1)"));
        assert!(html.contains("&lt;script&gt;alert(1)"));
    }

    #[test]
    fn empty_viewer_still_has_header() {
        let nav = nav();
        let set = ResultSet {
            columns: vec!["ts".to_owned(), "sender".to_owned()],
            rows: vec![],
        };
        let html = ViewerPage::new(&nav, "messages_clean", "", &set).render().unwrap();

        assert!(html.contains("<th>ts</th>"));
        assert!(html.contains("<th>sender</th>"));
        assert!(!html.contains("<td"));
    }

    #[test]
    fn graphs_without_data_have_no_chart() {
        let nav = nav();
        let page = GraphsPage::new(&nav, &[]).unwrap();
        assert!(page.points_json.is_none());
        let html = page.render().unwrap();
        assert!(html.contains("No data available."));
        assert!(!html.contains("new Chart("));
    }

    #[test]
    fn graphs_embed_points() {
        let nav = nav();
        let history = [ClimateRow {
            time: at(3),
            temperature: Some(19.25),
            humidity: None,
        }];
        let html = GraphsPage::new(&nav, &history).unwrap().render().unwrap();
        assert!(html.contains(
            r#"[{"time":"2025-01-01 03:00:00","temperature":19.25,"humidity":null}]"#
        ));
        assert!(html.contains("new Chart("));
    }
}
