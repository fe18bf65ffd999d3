use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use maud::{DOCTYPE, Markup, PreEscaped, html};

use super::{CSS, LOGIN_JS, UPDATES_JS, status_class};
use crate::AppState;
use crate::auth::Viewer;
use crate::config::UiConfig;

fn header(ui: &UiConfig, viewer: Viewer, login_enabled: bool) -> Markup {
    html! {
        header {
            div class="brand" {
                @if let Some(src) = &ui.brand_image {
                    img src=(src) alt=(ui.brand_alt.as_deref().unwrap_or(&ui.page_title));
                }
                h1 { (ui.page_title) }
            }
            div class="brand" {
                @if viewer.authenticated {
                    button id="logout-btn" type="button" { "Log out" }
                } @else if login_enabled {
                    button id="login-btn" type="button" { "Log in" }
                }
                @if let Some(src) = &ui.voip_image {
                    img src=(src) alt=(ui.voip_alt.as_deref().unwrap_or("VoIP"));
                }
            }
        }
    }
}

fn login_dialog() -> Markup {
    html! {
        dialog id="login-dialog" {
            form id="login-form" {
                label {
                    "Admin password"
                    input type="password" id="password" name="password" autocomplete="current-password";
                }
                p id="login-error" class="error hidden" { "Invalid password" }
                button type="submit" { "Log in" }
                " "
                button type="button" onclick="this.closest('dialog').close()" { "Cancel" }
            }
        }
    }
}

/// `GET /` - the status table, rendered from the store and kept live by
/// the inline script.
pub async fn index_page(State(state): State<AppState>, viewer: Viewer) -> impl IntoResponse {
    let endpoints = state.store.visible_snapshot(viewer.authenticated).await;
    let ui = &state.ui;
    let login_enabled = state.auth_config.login_enabled();

    let markup = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (ui.page_title) }
                style { (PreEscaped(CSS)) }
            }
            body {
                (header(ui, viewer, login_enabled))
                main {
                    table id="status-table" {
                        thead {
                            tr {
                                th class="sortable asc" data-sort="extension" { "Extension" }
                                th class="sortable" data-sort="description" { "Description" }
                                th { "Status" }
                            }
                        }
                        tbody {
                            @for endpoint in &endpoints {
                                tr id={ "e-" (endpoint.extension.as_str()) } class=(status_class(endpoint.status)) {
                                    td class="device-state" { (endpoint.extension.as_str()) }
                                    td { (endpoint.description.as_deref().unwrap_or_default()) }
                                    td { (endpoint.status.label()) }
                                }
                            }
                        }
                    }
                }
                @if !viewer.authenticated && login_enabled {
                    (login_dialog())
                }
                script { (PreEscaped(UPDATES_JS)) }
                script { (PreEscaped(LOGIN_JS)) }
            }
        }
    };

    Html(markup.into_string())
}
