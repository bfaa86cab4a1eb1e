//! Command parsing and execution.
//!
//! Each command stands in for one screen of the web client: the login and
//! registration forms, the profile page, the session manager, and the order
//! and schedule lists and forms.

use std::io::{self, Write};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::warn;

use minehaul_core::auth::{check_access, Access, AuthStatus};
use minehaul_core::models::{
    AccountKind, Identity, Order, OrderForm, Registration, Role, Schedule, ScheduleForm, ScheduleStatus,
    ScheduleUpdate, SessionRecord,
};
use minehaul_core::utils::{browser_name, format_currency, format_optional, format_timestamp, is_valid_email, truncate_string};
use minehaul_core::{ApiClient, Config, SessionStore};

/// Email used for non-interactive login
const ENV_EMAIL: &str = "MINEHAUL_EMAIL";

/// Password used for non-interactive login
const ENV_PASSWORD: &str = "MINEHAUL_PASSWORD";

/// Width of the route column in order listings
const ROUTE_COLUMN_WIDTH: usize = 40;

/// Width of the user agent column in session listings
const USER_AGENT_COLUMN_WIDTH: usize = 32;

/// Both planner roles; used where any signed-in planner may proceed.
const ALL_ROLES: &[Role] = &[Role::MinePlanner, Role::ShippingPlanner];

/// Flags that consume the following argument.
const VALUE_FLAGS: &[&str] = &["--role", "--email", "--order", "--status", "--notes", "--field"];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    Login { role: Option<Role>, email: Option<String> },
    Logout,
    WhoAmI,
    Sessions,
    Revoke { session_id: String },
    Register { kind: AccountKind },
    Orders { all: bool },
    Order { order_id: String },
    CreateOrder { fields: Map<String, Value> },
    DeleteOrder { order_id: String },
    Schedule { schedule_id: String },
    Schedules { order_id: Option<String> },
    CreateSchedule { order_id: String, fields: Map<String, Value> },
    UpdateSchedule { schedule_id: String, update: ScheduleUpdate },
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(Command::Help);
        };

        let command = match name.as_str() {
            "help" | "--help" | "-h" => Command::Help,
            "status" => Command::Status,
            "login" => {
                let role = option_value(rest, "--role")?
                    .map(|r| r.parse::<Role>().map_err(|e| anyhow!(e)))
                    .transpose()?;
                let email = option_value(rest, "--email")?;
                Command::Login { role, email }
            }
            "logout" => Command::Logout,
            "whoami" | "profile" => Command::WhoAmI,
            "sessions" => Command::Sessions,
            "revoke" => Command::Revoke {
                session_id: positional(rest, "session id")?,
            },
            "register" => {
                let kind = positional(rest, "account kind (mine or shipping)")?;
                Command::Register {
                    kind: kind.parse::<AccountKind>().map_err(|e| anyhow!(e))?,
                }
            }
            "orders" => Command::Orders {
                all: rest.iter().any(|a| a == "--all"),
            },
            "order" => Command::Order {
                order_id: positional(rest, "order id")?,
            },
            "create-order" => Command::CreateOrder {
                fields: field_values(rest)?,
            },
            "delete-order" => Command::DeleteOrder {
                order_id: positional(rest, "order id")?,
            },
            "schedule" => Command::Schedule {
                schedule_id: positional(rest, "schedule id")?,
            },
            "schedules" => Command::Schedules {
                order_id: option_value(rest, "--order")?,
            },
            "create-schedule" => Command::CreateSchedule {
                order_id: positional(rest, "order id")?,
                fields: field_values(rest)?,
            },
            "update-schedule" => {
                let schedule_id = positional(rest, "schedule id")?;
                let update = ScheduleUpdate {
                    status: option_value(rest, "--status")?
                        .map(|s| s.parse::<ScheduleStatus>().map_err(|e| anyhow!(e)))
                        .transpose()?,
                    notes: option_value(rest, "--notes")?,
                    extra: field_values(rest)?,
                    ..Default::default()
                };
                if update.is_empty() {
                    bail!("nothing to update: pass --status, --notes or --field key=value");
                }
                Command::UpdateSchedule { schedule_id, update }
            }
            other => bail!("unknown command: {}", other),
        };
        Ok(command)
    }
}

/// Value following `flag`, if the flag is present.
fn option_value(args: &[String], flag: &str) -> Result<Option<String>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => args
            .get(i + 1)
            .filter(|v| !v.starts_with("--"))
            .cloned()
            .map(Some)
            .ok_or_else(|| anyhow!("{} needs a value", flag)),
        None => Ok(None),
    }
}

/// First argument that is neither a flag nor a flag's value.
fn positional(args: &[String], what: &str) -> Result<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            iter.next();
        } else if !arg.starts_with("--") {
            return Ok(arg.clone());
        }
    }
    Err(anyhow!("missing {}", what))
}

/// Every `--field key=value` pair. Values that parse as JSON (numbers,
/// booleans) keep their type; anything else is sent as a string.
fn field_values(args: &[String]) -> Result<Map<String, Value>> {
    let mut fields = Map::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg != "--field" {
            continue;
        }
        let pair = iter.next().ok_or_else(|| anyhow!("--field needs key=value"))?;
        let (key, raw) = pair
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("--field expects key=value, got {}", pair))?;
        let value = serde_json::from_str::<Value>(raw)
            .ok()
            .filter(|v| !v.is_object() && !v.is_array())
            .unwrap_or_else(|| Value::String(raw.to_string()));
        fields.insert(key.trim().to_string(), value);
    }
    Ok(fields)
}

pub async fn run(command: Command, store: &SessionStore, api: &ApiClient, config: &mut Config) -> Result<()> {
    match command {
        Command::Help => Ok(()),
        Command::Status => status(store),
        Command::Login { role, email } => login(store, config, role, email).await,
        Command::Logout => {
            store.logout().await;
            println!("Signed out.");
            Ok(())
        }
        Command::WhoAmI => {
            let identity = require_access(store, ALL_ROLES)?;
            print_identity(&identity);
            Ok(())
        }
        Command::Sessions => sessions(store).await,
        Command::Revoke { session_id } => {
            require_access(store, ALL_ROLES)?;
            let state = store.state();
            if let Some(session) = state.sessions.iter().find(|s| s.id == session_id) {
                if let Some(reason) = revoke_refusal(session, Utc::now()) {
                    bail!("Session {} {}", session_id, reason);
                }
            }
            store
                .revoke_session(&session_id)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("Session {} revoked.", session_id);
            print_sessions(&store.state().sessions);
            Ok(())
        }
        Command::Register { kind } => register(store, kind).await,
        Command::Orders { all } => orders(store, api, all).await,
        Command::Order { order_id } => order(store, api, &order_id).await,
        Command::CreateOrder { fields } => create_order(store, api, fields).await,
        Command::DeleteOrder { order_id } => delete_order(store, api, &order_id).await,
        Command::Schedule { schedule_id } => schedule(store, api, &schedule_id).await,
        Command::Schedules { order_id } => schedules(store, api, order_id.as_deref()).await,
        Command::CreateSchedule { order_id, fields } => create_schedule(store, api, order_id, fields).await,
        Command::UpdateSchedule { schedule_id, update } => update_schedule(store, api, &schedule_id, &update).await,
    }
}

/// Route guard for authenticated-only commands.
fn require_access(store: &SessionStore, allowed_roles: &[Role]) -> Result<Identity> {
    let state = store.state();
    match check_access(&state, allowed_roles) {
        Access::Granted => state
            .identity
            .ok_or_else(|| anyhow!("Not signed in. Run `minehaul login` first.")),
        Access::RedirectToLogin => bail!("Not signed in. Run `minehaul login` first."),
        Access::Forbidden => bail!("This command is not available for your role."),
        Access::Pending => bail!("Still checking your session, try again."),
    }
}

/// Client that sends the store's current token.
fn authorized(store: &SessionStore, api: &ApiClient) -> Result<ApiClient> {
    let token = store
        .token()
        .ok_or_else(|| anyhow!("Not signed in. Run `minehaul login` first."))?;
    Ok(api.with_token(token))
}

fn status(store: &SessionStore) -> Result<()> {
    match store.status() {
        AuthStatus::Authenticated => {
            let state = store.state();
            if let Some(identity) = &state.identity {
                println!("Signed in as {} ({})", identity.email, identity.role.display_name());
            }
            if let Some(token) = &state.token {
                println!("Token expires {}", format_timestamp(&token.expires_at()));
            }
        }
        AuthStatus::Unauthenticated => println!("Not signed in."),
        AuthStatus::Unknown => println!("Checking session..."),
    }
    Ok(())
}

// ============================================================================
// Login / registration
// ============================================================================

async fn login(store: &SessionStore, config: &mut Config, role: Option<Role>, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| std::env::var(ENV_EMAIL).ok()) {
        Some(email) => email,
        None => prompt_with_default("Email", config.last_email.as_deref())?,
    };
    if !is_valid_email(&email) {
        bail!("Please enter a valid email address");
    }

    let role = match role.or(config.last_role) {
        Some(role) => role,
        None => prompt("Role [mine/shipping]")?
            .parse::<Role>()
            .map_err(|e| anyhow!(e))?,
    };

    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };

    println!("Signing in...");
    let identity = store
        .login(&email, &password, role)
        .await
        .map_err(|e| anyhow!("Login failed: {}", e.user_message()))?;

    config.last_email = Some(email);
    config.last_role = Some(role);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Welcome, {}!", identity.display_name);
    Ok(())
}

async fn register(store: &SessionStore, kind: AccountKind) -> Result<()> {
    println!("Register a new {} account\n", kind.role().display_name());

    let display_name = prompt("Full name")?;
    let email = prompt("Email")?;
    if !is_valid_email(&email) {
        bail!("Please enter a valid email address");
    }
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    let phone = prompt_optional("Phone")?;

    let registration = Registration {
        display_name,
        email,
        password,
        phone,
    };

    store
        .register(kind, &registration)
        .await
        .map_err(|e| anyhow!("Registration failed: {}", e.user_message()))?;

    println!("Account created. Sign in with `minehaul login --role {}`.", kind.as_str());
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input).context("Failed to read input")?;
    Ok(input.trim().to_string())
}

fn prompt_optional(label: &str) -> Result<Option<String>> {
    let input = prompt(&format!("{} (optional)", label))?;
    Ok(Some(input).filter(|i| !i.is_empty()))
}

fn prompt_number(label: &str) -> Result<Option<f64>> {
    prompt_optional(label)?
        .map(|raw| {
            raw.replace(',', "")
                .parse::<f64>()
                .map_err(|_| anyhow!("{} must be a number, got {}", label, raw))
        })
        .transpose()
}

fn prompt_with_default(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => {
            let input = prompt(&format!("{} [{}]", label, default))?;
            Ok(if input.is_empty() { default.to_string() } else { input })
        }
        None => prompt(label),
    }
}

// ============================================================================
// Profile and sessions
// ============================================================================

fn print_identity(identity: &Identity) {
    println!("Name:  {}", identity.display_name);
    println!("Email: {}", identity.email);
    println!("Role:  {}", identity.role.display_name());
    println!("Phone: {}", format_optional(&identity.phone, "-"));
    if let Some(created_at) = &identity.created_at {
        println!("Since: {}", format_timestamp(created_at));
    }
}

async fn sessions(store: &SessionStore) -> Result<()> {
    require_access(store, ALL_ROLES)?;
    store
        .load_sessions()
        .await
        .map_err(|e| anyhow!("Failed to load sessions: {}", e.user_message()))?;
    print_sessions(&store.state().sessions);
    Ok(())
}

fn print_sessions(sessions: &[SessionRecord]) {
    if sessions.is_empty() {
        println!("No active sessions");
        return;
    }

    let now = Utc::now();
    for session in sessions {
        let marker = if session.revoked {
            "revoked"
        } else if session.is_expired(now) {
            "expired"
        } else if session.is_current(now) {
            "current"
        } else {
            ""
        };
        let last_used = session
            .last_used_at
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "Never".to_string());

        println!(
            "{:<24} {:<8} {:<15} {:<width$} last active {:<18} expires {} {}",
            session.id,
            browser_name(&session.user_agent),
            session.origin_ip,
            truncate_string(&session.user_agent, USER_AGENT_COLUMN_WIDTH),
            last_used,
            format_timestamp(&session.expires_at),
            marker,
            width = USER_AGENT_COLUMN_WIDTH,
        );
    }
}

/// Why a session may not be revoked from here, if it may not.
fn revoke_refusal(session: &SessionRecord, now: chrono::DateTime<Utc>) -> Option<&'static str> {
    if session.can_revoke(now) {
        None
    } else if session.revoked {
        Some("is already revoked")
    } else if session.is_expired(now) {
        Some("has already expired")
    } else {
        Some("is the one you are using; run `minehaul logout` instead")
    }
}

// ============================================================================
// Orders and schedules
// ============================================================================

async fn orders(store: &SessionStore, api: &ApiClient, all: bool) -> Result<()> {
    let identity = require_access(store, ALL_ROLES)?;
    let client = authorized(store, api)?;

    // Mine planners see their own orders unless they ask for everything.
    let orders = if identity.has_role(Role::MinePlanner) && !all {
        client.fetch_my_orders().await
    } else {
        client.fetch_all_orders().await
    }
    .map_err(|e| anyhow!("Failed to load orders: {}", e.user_message()))?;

    if orders.is_empty() {
        println!("No orders");
        return Ok(());
    }
    for order in &orders {
        print_order_line(order);
    }
    let open = orders.iter().filter(|o| o.status.is_open()).count();
    println!("\n{} orders, {} open", orders.len(), open);
    Ok(())
}

async fn create_order(store: &SessionStore, api: &ApiClient, fields: Map<String, Value>) -> Result<()> {
    require_access(store, &[Role::MinePlanner])?;
    let client = authorized(store, api)?;

    println!("New transport order\n");
    let form = OrderForm {
        origin: prompt("Origin")?,
        destination: prompt("Destination")?,
        cargo_type: prompt("Cargo type")?,
        cargo_weight_tons: prompt_number("Cargo weight (tons)")?.unwrap_or(0.0),
        transport_mode: prompt("Transport mode")?,
        distance_km: prompt_number("Distance (km)")?,
        planned_departure: prompt_optional("Planned departure")?,
        extra: fields,
    };
    if let Some(field) = form.missing_field() {
        bail!("Please fill in the {}", field);
    }

    let order = client
        .create_order(&form)
        .await
        .map_err(|e| anyhow!("Failed to create order: {}", e.user_message()))?;
    println!("Order created:");
    print_order_line(&order);
    Ok(())
}

async fn order(store: &SessionStore, api: &ApiClient, order_id: &str) -> Result<()> {
    require_access(store, ALL_ROLES)?;
    let client = authorized(store, api)?;

    let (order, schedules) = futures::future::try_join(
        client.fetch_order(order_id),
        client.fetch_schedules_for_order(order_id),
    )
    .await
    .map_err(|e| anyhow!("Failed to load order {}: {}", order_id, e.user_message()))?;

    print_order_line(&order);
    println!("  Cargo:     {} ({})", order.cargo_type, weight_display(order.cargo_weight_tons));
    if let Some(departure) = &order.planned_departure {
        println!("  Departure: {}", departure);
    }
    if let Some(distance) = order.distance_km {
        println!("  Distance:  {:.1} km", distance);
    }
    println!("  Created:   {}", format_timestamp(&order.created_at));
    print_extra(&order.extra);

    println!("\nSchedules:");
    if schedules.is_empty() {
        println!("  none yet");
    }
    for schedule in &schedules {
        print_schedule_line(schedule);
    }
    Ok(())
}

/// Only mine planners own orders, so only they may delete one.
async fn delete_order(store: &SessionStore, api: &ApiClient, order_id: &str) -> Result<()> {
    require_access(store, &[Role::MinePlanner])?;
    let client = authorized(store, api)?;

    client
        .delete_order(order_id)
        .await
        .map_err(|e| anyhow!("Failed to delete order {}: {}", order_id, e.user_message()))?;
    println!("Order {} deleted.", order_id);
    Ok(())
}

async fn schedule(store: &SessionStore, api: &ApiClient, schedule_id: &str) -> Result<()> {
    require_access(store, ALL_ROLES)?;
    let client = authorized(store, api)?;

    let schedule = client
        .fetch_schedule(schedule_id)
        .await
        .map_err(|e| anyhow!("Failed to load schedule {}: {}", schedule_id, e.user_message()))?;

    print_schedule_line(&schedule);
    println!("  Order:     {}", schedule.order_id);
    println!("  Arrival:   {}", format_optional(&schedule.arrival_time, "-"));
    println!("  Road:      {}", format_optional(&schedule.road_condition_status, "-"));
    println!("  Weather:   {}", format_optional(&schedule.weather_condition, "-"));
    if let Some(notes) = &schedule.notes {
        println!("  Notes:     {}", notes);
    }
    print_extra(&schedule.extra);
    Ok(())
}

async fn create_schedule(
    store: &SessionStore,
    api: &ApiClient,
    order_id: String,
    fields: Map<String, Value>,
) -> Result<()> {
    require_access(store, &[Role::ShippingPlanner])?;
    let client = authorized(store, api)?;

    println!("New schedule for order {}\n", order_id);
    let form = ScheduleForm {
        order_id,
        vehicle_id: prompt_optional("Vehicle id")?,
        vessel_name: prompt_optional("Vessel name")?,
        departure_time: prompt_optional("Departure time")?,
        arrival_time: prompt_optional("Arrival time")?,
        road_condition_status: prompt_optional("Road condition")?,
        weather_condition: prompt_optional("Weather")?,
        cost_usd: prompt_number("Cost (USD)")?,
        notes: prompt_optional("Notes")?,
        extra: fields,
    };

    let schedule = client
        .create_schedule(&form)
        .await
        .map_err(|e| anyhow!("Failed to create schedule: {}", e.user_message()))?;
    println!("Schedule created:");
    print_schedule_line(&schedule);
    Ok(())
}

async fn update_schedule(
    store: &SessionStore,
    api: &ApiClient,
    schedule_id: &str,
    update: &ScheduleUpdate,
) -> Result<()> {
    require_access(store, &[Role::ShippingPlanner])?;
    let client = authorized(store, api)?;

    let schedule = client
        .update_schedule(schedule_id, update)
        .await
        .map_err(|e| anyhow!("Failed to update schedule {}: {}", schedule_id, e.user_message()))?;
    println!("Schedule updated:");
    print_schedule_line(&schedule);
    Ok(())
}

async fn schedules(store: &SessionStore, api: &ApiClient, order_id: Option<&str>) -> Result<()> {
    require_access(store, ALL_ROLES)?;
    let client = authorized(store, api)?;

    let schedules = match order_id {
        Some(order_id) => client.fetch_schedules_for_order(order_id).await,
        None => client.fetch_schedules().await,
    }
    .map_err(|e| anyhow!("Failed to load schedules: {}", e.user_message()))?;

    if schedules.is_empty() {
        println!("No schedules");
    }
    for schedule in &schedules {
        print_schedule_line(schedule);
    }
    Ok(())
}

fn weight_display(tons: Option<f64>) -> String {
    tons.map(|t| format!("{:.1} t", t)).unwrap_or_else(|| "-".to_string())
}

/// Scalar telemetry fields the typed model does not cover.
fn print_extra(extra: &Map<String, Value>) {
    let mut scalars: Vec<(&String, String)> = extra
        .iter()
        .filter_map(|(key, value)| scalar_display(value).map(|v| (key, v)))
        .collect();
    if scalars.is_empty() {
        return;
    }
    scalars.sort();

    println!("  Telemetry:");
    for (key, value) in scalars {
        println!("    {:<28} {}", key, value);
    }
}

fn scalar_display(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn print_order_line(order: &Order) {
    let cost = order
        .estimated_cost_usd
        .map(format_currency)
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<20} {:<12} {:<width$} {:>10} {:>14}",
        order.order_code,
        order.status.to_string(),
        truncate_string(&order.route(), ROUTE_COLUMN_WIDTH),
        weight_display(order.cargo_weight_tons),
        cost,
        width = ROUTE_COLUMN_WIDTH,
    );
}

fn print_schedule_line(schedule: &Schedule) {
    let cost = schedule
        .cost_usd
        .map(format_currency)
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {:<24} {:<10} {:<20} {:<20} {:>14}",
        schedule.id,
        schedule.status.to_string(),
        schedule.carrier().unwrap_or("-"),
        format_optional(&schedule.departure_time, "-"),
        cost,
    );
}
