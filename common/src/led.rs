/// State of one of the two remote LEDs as reported in telemetry.
///
/// Both the table cells and the chart series are derived from this one value,
/// so a row never reads "On" in the table while plotting 0 in the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedState {
    On,
    Off,
    #[default]
    Unknown,
}

impl LedState {
    /// Text shown in table cells and the latest-telemetry panel.
    pub fn label(self) -> &'static str {
        match self {
            LedState::On => "On",
            LedState::Off => "Off",
            LedState::Unknown => "",
        }
    }

    /// Level plotted on the 0/1 step series.
    pub fn level(self) -> Option<u8> {
        match self {
            LedState::On => Some(1),
            LedState::Off => Some(0),
            LedState::Unknown => None,
        }
    }
}

/// Text form of a stored LED value. `t`/`f` is how the store reports a
/// boolean, `true`/`false` is what a boolean column yields under `::text`.
/// Anything else, NULL included, is unknown.
impl From<Option<&str>> for LedState {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some("t" | "true") => LedState::On,
            Some("f" | "false") => LedState::Off,
            _ => LedState::Unknown,
        }
    }
}
