use crate::{
    settings::{FieldError, Settings},
    ResultSummary, ScoreAverage,
};
use askama::Template;

pub const HOME_CSS: &str = "styles/home.css";
pub const SETTINGS_CSS: &str = "styles/settings.css";

pub const SETUP_MESSAGE: &str =
    "You'll need to set-up your database settings before anything can start working.";

#[derive(Template)]
#[template(path = "home.html")]
pub struct HomeView {
    pub cssfile: &'static str,
    pub top_sites: Vec<ResultSummary>,
    pub worst_sites: Vec<ResultSummary>,
    pub score_averages: Vec<ScoreAverage>,
    pub biggest_total_resource_pages: Vec<ResultSummary>,
}

#[derive(Template)]
#[template(path = "settings.html")]
pub struct SettingsView {
    pub cssfile: &'static str,
    pub message: Option<&'static str>,
    pub field_errors: Vec<FieldError>,
    pub settings: Settings,
}

impl SettingsView {
    pub fn new(settings: Settings, message: Option<&'static str>) -> Self {
        Self {
            cssfile: SETTINGS_CSS,
            message,
            field_errors: Vec::new(),
            settings,
        }
    }

    /// The setup prompt shown in place of the dashboard.
    pub fn setup(settings: Settings, field_errors: Vec<FieldError>) -> Self {
        Self {
            field_errors,
            ..Self::new(settings, Some(SETUP_MESSAGE))
        }
    }
}
