//! Built-in functions exposed on the panel.
//!
//! Every target holds a weak handle to the [`PanelContext`] that owns the
//! table, so the table can live inside the context without a cycle.

use std::sync::Weak;

use panel_core::credentials::{self, SortMode};
use panel_core::registry::{self, ArgValue, Callable, CallableTable, Registration};
use panel_core::{
    DispatchError, Encryption, FunctionDecl, PanelError, PanelResult, ParamDecl, ParamType,
    PresentationType,
};

use crate::board::BoardError;
use crate::context::PanelContext;

pub const LED: &str = "led";
pub const GET_TEMPERATURE: &str = "get_temperature";
pub const GET_WIFI_STATUS: &str = "get_wifi_status";
pub const SCAN_NETWORKS: &str = "scan_networks";
pub const GET_SCAN_RESULT: &str = "get_scan_result";
pub const STA_CONNECT: &str = "sta_connect";
pub const STA_DISCONNECT: &str = "sta_disconnect";
pub const AP_START: &str = "ap_start";
pub const LIST_CREDENTIALS: &str = "list_credentials";
pub const ADD_CREDENTIAL: &str = "add_credential";
pub const UPDATE_CREDENTIAL: &str = "update_credential";
pub const DELETE_CREDENTIAL: &str = "delete_credential";
pub const SORT_CREDENTIALS: &str = "sort_credentials";
pub const REORDER_FUNCTIONS: &str = "reorder_functions";
pub const REMOVE_FUNCTION: &str = "remove_function";
pub const UPDATE_DOC: &str = "update_doc";
pub const RESET: &str = "reset";

/// Argument `i` as text; absent arguments are empty.
fn text(args: &[ArgValue], i: usize) -> String {
    args.get(i).map(ToString::to_string).unwrap_or_default()
}

fn board_error(e: BoardError) -> PanelError {
    DispatchError::Target(e.to_string()).into()
}

/// Wrap `f` so it runs against the live context.
fn bind(
    ctx: &Weak<PanelContext>,
    f: fn(&PanelContext, &[ArgValue]) -> PanelResult<String>,
) -> impl Callable {
    let ctx = ctx.clone();
    move |args: &[ArgValue]| -> PanelResult<String> {
        let ctx = ctx
            .upgrade()
            .ok_or_else(|| PanelError::Unavailable("panel is shutting down".to_string()))?;
        f(&ctx, args)
    }
}

fn string(name: &str) -> ParamDecl {
    ParamDecl::new(name, ParamType::String)
}

/// The callable table with every built-in, in default panel order.
pub fn builtin_table(ctx: Weak<PanelContext>) -> CallableTable {
    use PresentationType::{Function, Rut, Show};

    let encryptions: Vec<&str> = Encryption::ALL.iter().map(Encryption::as_str).collect();

    CallableTable::new()
        .with(Registration::new(
            LED,
            FunctionDecl::new("LED", Function, "Switch the on-board LED.")
                .param(string("state").with_choices(&["on", "off"])),
            bind(&ctx, led),
        ))
        .with(Registration::new(
            GET_TEMPERATURE,
            FunctionDecl::new("Temperature", Show, "Chip temperature sensor."),
            bind(&ctx, get_temperature),
        ))
        .with(
            Registration::new(
                GET_WIFI_STATUS,
                FunctionDecl::new("WiFi status", Show, "Station connection state."),
                bind(&ctx, get_wifi_status),
            )
            .protected(),
        )
        .with(Registration::new(
            SCAN_NETWORKS,
            FunctionDecl::new("Scan networks", Rut, "Start a scan in the background."),
            bind(&ctx, scan_networks),
        ))
        .with(
            Registration::new(
                GET_SCAN_RESULT,
                FunctionDecl::new("Scan result", Show, "Networks found by the last scan."),
                bind(&ctx, get_scan_result),
            )
            .protected(),
        )
        .with(Registration::new(
            STA_CONNECT,
            FunctionDecl::new(
                "Connect",
                Rut,
                "Join a network. Leave the password empty to use the saved one.",
            )
            .param(string("ssid"))
            .param(string("password")),
            bind(&ctx, sta_connect),
        ))
        .with(Registration::new(
            STA_DISCONNECT,
            FunctionDecl::new("Disconnect", Rut, "Leave the current network."),
            bind(&ctx, sta_disconnect),
        ))
        .with(Registration::new(
            AP_START,
            FunctionDecl::new("Access point", Function, "Restart the access point.")
                .param(string("ssid"))
                .param(string("encryption").with_choices(&encryptions))
                .param(string("password")),
            bind(&ctx, ap_start),
        ))
        .with(Registration::new(
            LIST_CREDENTIALS,
            FunctionDecl::new("Saved networks", Rut, ""),
            bind(&ctx, list_credentials),
        ))
        .with(Registration::new(
            ADD_CREDENTIAL,
            FunctionDecl::new("Save network", Rut, "")
                .param(string("ssid"))
                .param(string("password")),
            bind(&ctx, add_credential),
        ))
        .with(Registration::new(
            UPDATE_CREDENTIAL,
            FunctionDecl::new("Change saved password", Rut, "")
                .param(string("ssid"))
                .param(string("password")),
            bind(&ctx, update_credential),
        ))
        .with(Registration::new(
            DELETE_CREDENTIAL,
            FunctionDecl::new("Forget network", Rut, "").param(string("ssid")),
            bind(&ctx, delete_credential),
        ))
        .with(Registration::new(
            SORT_CREDENTIALS,
            FunctionDecl::new("Sort saved networks", Rut, "")
                .param(string("mode").with_choices(&["connection", "asc", "desc"])),
            bind(&ctx, sort_credentials),
        ))
        .with(
            Registration::new(
                REORDER_FUNCTIONS,
                FunctionDecl::new(
                    "Reorder panel",
                    Rut,
                    "Comma-separated ids. Leave empty to show the current order.",
                )
                .param(string("order")),
                bind(&ctx, reorder_functions),
            )
            .protected(),
        )
        .with(
            Registration::new(
                REMOVE_FUNCTION,
                FunctionDecl::new("Remove function", Rut, "").param(string("id")),
                bind(&ctx, remove_function),
            )
            .protected(),
        )
        .with(Registration::new(
            UPDATE_DOC,
            FunctionDecl::new("Edit description", Rut, "")
                .param(string("id"))
                .param(string("doc")),
            bind(&ctx, update_doc),
        ))
        .with(
            Registration::new(
                RESET,
                FunctionDecl::new("Restart", Function, "Restart the device."),
                bind(&ctx, reset),
            )
            .protected()
            .after_response(),
        )
}

fn led(ctx: &PanelContext, args: &[ArgValue]) -> PanelResult<String> {
    let state = text(args, 0).to_ascii_lowercase();
    let on = match state.as_str() {
        "on" => true,
        "off" => false,
        other => {
            return Err(PanelError::validation(format!(
                "LED state must be on or off, got {:?}",
                other
            )))
        }
    };
    ctx.board().set_led(on).map_err(board_error)?;
    Ok(format!("LED {}", state))
}

fn get_temperature(ctx: &PanelContext, _: &[ArgValue]) -> PanelResult<String> {
    let celsius = ctx.board().temperature_c().map_err(board_error)?;
    Ok(format!("{:.1}°C", celsius))
}

fn get_wifi_status(ctx: &PanelContext, _: &[ArgValue]) -> PanelResult<String> {
    Ok(ctx.wifi().connection_state().describe())
}

fn scan_networks(ctx: &PanelContext, _: &[ArgValue]) -> PanelResult<String> {
    ctx.wifi().scan()
}

fn get_scan_result(ctx: &PanelContext, _: &[ArgValue]) -> PanelResult<String> {
    Ok(ctx.wifi().scan_state().describe())
}

fn sta_connect(ctx: &PanelContext, args: &[ArgValue]) -> PanelResult<String> {
    let ssid = text(args, 0);
    let mut password = text(args, 1);
    if password.is_empty() {
        password = credentials::password_for(ctx.store(), &ssid)?.ok_or_else(|| {
            PanelError::validation(format!("no saved password for '{}'", ssid))
        })?;
    }
    ctx.wifi().connect(&ssid, &password)
}

fn sta_disconnect(ctx: &PanelContext, _: &[ArgValue]) -> PanelResult<String> {
    ctx.wifi().disconnect()
}

fn ap_start(ctx: &PanelContext, args: &[ArgValue]) -> PanelResult<String> {
    ctx.wifi()
        .start_ap(&text(args, 0), &text(args, 1), &text(args, 2))
}

fn list_credentials(ctx: &PanelContext, _: &[ArgValue]) -> PanelResult<String> {
    Ok(credentials::describe(&credentials::list(ctx.store())?))
}

fn add_credential(ctx: &PanelContext, args: &[ArgValue]) -> PanelResult<String> {
    credentials::add(ctx.store(), &text(args, 0), &text(args, 1))
}

fn update_credential(ctx: &PanelContext, args: &[ArgValue]) -> PanelResult<String> {
    credentials::update(ctx.store(), &text(args, 0), &text(args, 1))
}

fn delete_credential(ctx: &PanelContext, args: &[ArgValue]) -> PanelResult<String> {
    credentials::delete(ctx.store(), &text(args, 0))
}

fn sort_credentials(ctx: &PanelContext, args: &[ArgValue]) -> PanelResult<String> {
    let mode: SortMode = text(args, 0).parse()?;
    credentials::sort(ctx.store(), mode)
}

fn reorder_functions(ctx: &PanelContext, args: &[ArgValue]) -> PanelResult<String> {
    registry::reorder(ctx.store(), &text(args, 0))
}

fn remove_function(ctx: &PanelContext, args: &[ArgValue]) -> PanelResult<String> {
    registry::remove(ctx.store(), ctx.dispatcher().table(), &text(args, 0))
}

fn update_doc(ctx: &PanelContext, args: &[ArgValue]) -> PanelResult<String> {
    registry::update_doc(ctx.store(), &text(args, 0), &text(args, 1))
}

fn reset(ctx: &PanelContext, _: &[ArgValue]) -> PanelResult<String> {
    ctx.board().restart();
    Ok("restarting".to_string())
}
