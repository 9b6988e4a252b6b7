use anyhow::Result;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};

use crate::{
    actions,
    config::{GcpArgs, RunContext},
    gcloud::{Gcloud, InstanceInfo},
    readiness::ReadinessPolicy,
};

pub fn run(gcp: &GcpArgs, ctx: &RunContext) -> Result<()> {
    let vm_name = ctx.vm_name(gcp.vm_name.as_deref())?;
    let gcloud = Gcloud::from_args(gcp);
    super::authenticate(&gcloud, gcp.gcp_service_account_key.as_deref())?;

    let info = show(&gcloud, &vm_name)?;
    if ReadinessPolicy::default().is_ready(&info.labels) {
        actions::success(format!("{} has a live runner agent", vm_name.cyan()));
    } else {
        actions::warning(format!("{} has not reported ready", vm_name.cyan()));
    }
    Ok(())
}

/// Describe the instance and print it as a table.
pub fn show(gcloud: &Gcloud, vm_name: &str) -> Result<InstanceInfo> {
    let info = gcloud.describe_instance(vm_name)?;
    println!("{}", render_table(vm_name, gcloud.zone(), &info));
    Ok(info)
}

pub(crate) fn render_table(vm_name: &str, zone: &str, info: &InstanceInfo) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Field").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);

    let name = if info.name.is_empty() { vm_name } else { info.name.as_str() };
    let status_color = match info.status.as_str() {
        "RUNNING" => Color::Green,
        "TERMINATED" | "STOPPING" | "SUSPENDED" => Color::Red,
        _ => Color::Yellow,
    };

    table.add_row(vec![Cell::new("Name"), Cell::new(name).fg(Color::Cyan)]);
    table.add_row(vec![Cell::new("Zone"), Cell::new(zone)]);
    table.add_row(vec![Cell::new("Status"), Cell::new(or_dash(&info.status)).fg(status_color)]);
    table.add_row(vec![Cell::new("Machine type"), Cell::new(or_dash(info.machine_type_short()))]);

    let mut labels: Vec<_> = info.labels.iter().collect();
    labels.sort();
    for (key, value) in labels {
        table.add_row(vec![Cell::new(format!("label: {}", key)), Cell::new(value)]);
    }
    table
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "—" } else { s }
}
