use crate::{
    runs::{RepositoryProvider, RunsRepository},
    settings::{Settings, SettingsStore},
    views::{HomeView, SettingsView, HOME_CSS},
};
use anyhow::Result;
use askama::Template;
use log::{error, warn};
use std::{collections::BTreeMap, convert::Infallible, path::PathBuf, sync::Arc};
use warp::{
    http::{StatusCode, Uri},
    reply::Response,
    Filter, Rejection, Reply,
};

pub const DEFAULT_RESULT_COUNT: u32 = 10;
pub const DASHBOARD_RESULT_COUNT: u32 = 3;
pub const SCORE_AVERAGE_DAYS: u32 = 30 * 3;

const MAX_FORM_BYTES: u64 = 16 * 1024;

/// Unset or zero counts fall back to [`DEFAULT_RESULT_COUNT`].
pub fn result_count(requested: Option<u32>) -> u32 {
    requested
        .filter(|count| *count > 0)
        .unwrap_or(DEFAULT_RESULT_COUNT)
}

pub struct Controller {
    settings: SettingsStore,
    provider: Arc<dyn RepositoryProvider>,
}

impl Controller {
    pub fn new(settings: SettingsStore, provider: Arc<dyn RepositoryProvider>) -> Self {
        Self { settings, provider }
    }

    pub async fn index(&self) -> Response {
        let settings = match self.configured_settings().await {
            Ok(settings) => settings,
            Err(setup) => return render(setup),
        };

        let dashboard = async {
            let runs = self.provider.repository(&settings)?;
            load_dashboard(runs.as_ref()).await
        };
        match dashboard.await {
            Ok(view) => render(view),
            Err(e) => something_broke(e),
        }
    }

    pub async fn settings_page(&self) -> Response {
        match self.settings.load().await {
            Ok(settings) => render(SettingsView::new(settings, None)),
            Err(e) => something_broke(e),
        }
    }

    /// Saves the form as submitted, then redirects home whether or not it validates.
    /// Validation failures are logged and make the index show the setup form again.
    pub async fn submit_settings(&self, params: BTreeMap<String, String>) -> Response {
        if let Err(e) = self.settings.save(&params).await {
            return something_broke(e);
        }

        let saved = match self.settings.load().await {
            Ok(saved) => saved,
            Err(e) => return something_broke(e),
        };
        for field_error in saved.validate() {
            warn!(
                "Saved incomplete settings ({}): {}",
                field_error.error_key, field_error.error_msg
            );
        }

        warp::redirect::found(Uri::from_static("/")).into_response()
    }

    async fn configured_settings(&self) -> Result<Settings, SettingsView> {
        let stored = match self.settings.read().await {
            Ok(Some(stored)) => stored,
            Ok(None) => return Err(SettingsView::setup(Settings::default(), Vec::new())),
            Err(e) => {
                warn!("Treating settings as not configured: {e:#}");
                return Err(SettingsView::setup(Settings::default(), Vec::new()));
            }
        };

        let settings = Settings::resolve(&stored);
        let field_errors = settings.validate();
        if field_errors.is_empty() {
            Ok(settings)
        } else {
            Err(SettingsView::setup(settings, field_errors))
        }
    }
}

/// Every lookup after the first is keyed on the latest run, so they run in order
/// and the first failure ends the request.
async fn load_dashboard(runs: &dyn RunsRepository) -> Result<HomeView> {
    let run_id = runs.latest_complete_run().await?.run_id;
    let count = result_count(Some(DASHBOARD_RESULT_COUNT));

    let top_sites = runs.top_results_for_run(run_id, count).await?;
    let worst_sites = runs.worst_results_for_run(run_id, count).await?;
    let score_averages = runs.previous_score_averages(SCORE_AVERAGE_DAYS).await?;
    let biggest_total_resource_pages = runs
        .biggest_pages_by_total_resources(run_id, count)
        .await?;

    Ok(HomeView {
        cssfile: HOME_CSS,
        top_sites,
        worst_sites,
        score_averages,
        biggest_total_resource_pages,
    })
}

fn render<T: Template>(view: T) -> Response {
    match view.render() {
        Ok(html) => warp::reply::html(html).into_response(),
        Err(e) => something_broke(e.into()),
    }
}

fn something_broke(e: anyhow::Error) -> Response {
    error!("{e:#}");
    warp::reply::with_status(
        format!("Something broke! {e:#}"),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .into_response()
}

pub fn routes(
    controller: Arc<Controller>,
    static_dir: PathBuf,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let controller = warp::any().map(move || controller.clone());

    let index = warp::path::end()
        .and(warp::get())
        .and(controller.clone())
        .and_then(get_index);

    let settings = warp::path("settings")
        .and(warp::path::end())
        .and(warp::get())
        .and(controller.clone())
        .and_then(get_settings);

    let settings_submit = warp::path("settings")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_FORM_BYTES))
        .and(warp::body::form())
        .and(controller)
        .and_then(post_settings);

    let styles = warp::path("styles").and(warp::fs::dir(static_dir.join("styles")));

    index
        .or(settings)
        .or(settings_submit)
        .or(styles)
        .with(warp::log("webperf_dashboard::access"))
}

async fn get_index(controller: Arc<Controller>) -> Result<Response, Infallible> {
    Ok(controller.index().await)
}

async fn get_settings(controller: Arc<Controller>) -> Result<Response, Infallible> {
    Ok(controller.settings_page().await)
}

async fn post_settings(
    params: BTreeMap<String, String>,
    controller: Arc<Controller>,
) -> Result<Response, Infallible> {
    Ok(controller.submit_settings(params).await)
}
