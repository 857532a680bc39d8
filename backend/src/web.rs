use std::sync::Arc;

use actix_web::{
    get,
    http::{header::ContentType, StatusCode},
    middleware::Logger,
    post,
    web::{self, Data},
    App, HttpResponse, HttpServer, ResponseError,
};
use askama::Template;
use common::req::LedCommand;
use log::{error, info};

use crate::config::{Config, ViewerConfig};
use crate::db::{self, Connector, StoreError, TelemetryStore};
use crate::pages::{DashboardPage, GraphsPage, NavLink, ViewerPage};
use crate::relay::{CommandResult, Relay};

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Rendering failed: {0}")]
    Render(#[from] askama::Error),
    #[error("Rendering failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Request aborted: {0}")]
    Blocking(#[from] actix_web::error::BlockingError),
}

impl ResponseError for PageError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type(ContentType::plaintext())
            .body(self.to_string())
    }
}

pub struct AppState {
    pub config: Config,
    pub connector: Arc<dyn Connector>,
    pub relay: Relay,
    pub nav: Vec<NavLink>,
}

impl AppState {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        let mut nav = vec![
            NavLink {
                href: "/".to_owned(),
                title: "Dashboard".to_owned(),
            },
            NavLink {
                href: "/graphs".to_owned(),
                title: "Graphs".to_owned(),
            },
        ];
        nav.extend(config.viewers.iter().map(|viewer| NavLink {
            href: viewer.route.clone(),
            title: viewer.title.clone(),
        }));

        Self {
            relay: Relay::new(&config.relay),
            config,
            connector,
            nav,
        }
    }
}

/// Checkbox fields are only present when ticked.
#[derive(Debug, Default, serde::Deserialize)]
pub struct LedForm {
    led1: Option<String>,
    led2: Option<String>,
    send_leds: Option<String>,
}

impl LedForm {
    /// `None` unless the form was submitted with the send button.
    pub fn command(&self) -> Option<LedCommand> {
        self.send_leds.as_ref()?;

        Some(LedCommand {
            led1: self.led1.is_some(),
            led2: self.led2.is_some(),
        })
    }
}

/// Runs `query` against a store opened for this call only. The store, and
/// with it the connection, is dropped before the result is returned.
async fn load<T, F>(state: &AppState, query: F) -> Result<T, PageError>
where
    F: FnOnce(Box<dyn TelemetryStore>) -> db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let connector = state.connector.clone();
    let result = web::block(move || query(connector.connect()?)).await?;

    result.map_err(|e| {
        error!("{e}");
        e.into()
    })
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok().content_type(ContentType::html()).body(body)
}

async fn render_dashboard(
    state: &AppState,
    command: Option<&CommandResult>,
) -> Result<HttpResponse, PageError> {
    let view = state.config.dashboard.view.clone();
    let history = load(state, move |mut store| store.telemetry_history(&view)).await?;

    let page = DashboardPage::new(&state.nav, &state.config.dashboard.view, &history, command)?;
    Ok(html(page.render()?))
}

#[get("/")]
async fn dashboard(state: Data<AppState>) -> Result<HttpResponse, PageError> {
    render_dashboard(&state, None).await
}

#[post("/")]
async fn send_leds(
    state: Data<AppState>,
    form: web::Form<LedForm>,
) -> Result<HttpResponse, PageError> {
    let result = match form.command() {
        Some(command) => Some(state.relay.send(&command).await),
        None => None,
    };

    render_dashboard(&state, result.as_ref()).await
}

#[get("/graphs")]
async fn graphs(state: Data<AppState>) -> Result<HttpResponse, PageError> {
    let view = state.config.graphs.view.clone();
    let history = load(&state, move |mut store| store.climate_history(&view)).await?;

    let page = GraphsPage::new(&state.nav, &history)?;
    Ok(html(page.render()?))
}

async fn list_viewer(
    state: Data<AppState>,
    viewer: Data<ViewerConfig>,
) -> Result<HttpResponse, PageError> {
    let (view, order_by, limit) = (viewer.view.clone(), viewer.order_by.clone(), viewer.limit);
    let set = load(&state, move |mut store| {
        store.latest_rows(&view, &order_by, limit)
    })
    .await?;

    let page = ViewerPage::new(&state.nav, &viewer.title, &viewer.description, &set);
    Ok(html(page.render()?))
}

pub fn routes(cfg: &mut web::ServiceConfig, viewers: &[ViewerConfig]) {
    cfg.service(dashboard).service(send_leds).service(graphs);

    for viewer in viewers {
        cfg.service(
            web::resource(viewer.route.as_str())
                .app_data(Data::new(viewer.clone()))
                .route(web::get().to(list_viewer)),
        );
    }
}

pub async fn new_http_server(state: AppState) -> std::io::Result<()> {
    let address = state.config.server_address();
    let state = Data::new(state);
    info!("serving dashboard on http://{address}");

    HttpServer::new(move || {
        let viewers = state.config.viewers.clone();
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(|cfg| routes(cfg, &viewers))
    })
    .bind(address)?
    .run()
    .await
}
