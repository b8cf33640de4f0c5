//! Device info output.

use {anyhow::Result, escape32::DeviceInfo};

/// Human-readable lines for a device info query.
pub(crate) fn format_device_info(info: &DeviceInfo) -> Vec<String> {
    let firmware = match &info.firmware {
        Some(fw) => format!("Firmware revision {} [{}]", fw.revision, fw.name),
        None => "Firmware not installed!".to_string(),
    };
    vec![
        format!("Bootloader revision {}", info.bootloader.revision),
        firmware,
    ]
}

/// JSON document for a device info query.
pub(crate) fn device_info_json(info: &DeviceInfo) -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "data": info,
    })
}

/// Print the result of a device info query to stdout.
pub(crate) fn print_device_info(info: &DeviceInfo, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&device_info_json(info))?
        );
        return Ok(());
    }

    for line in format_device_info(info) {
        println!("{line}");
    }
    Ok(())
}
