//! Command-line control tool for the Chameleon board.
//!
//! Runs on the board itself and drives the driver core directly: HPD
//! plug/unplug/pulses, EDID load/readback, capture with checksum printout.

use std::rc::Rc;

use chameleon_fpga::{
    ChameleonDriver, Config, CropRect, DevI2cBus, HpdLevel, MappedRegisterBank, PortId, VgaMode,
};

fn print_usage() {
    println!("Chameleon FPGA Control Tool\n");
    println!("USAGE:");
    println!("    sudo chameleon-fpga [OPTIONS] COMMAND [ARGS]\n");
    println!("OPTIONS:");
    println!("    --mem <PATH>           Memory device (default /dev/mem)");
    println!("    --i2c-bus <N>          Main I2C bus index (default 0)");
    println!("    --default-edid <PATH>  Factory-default EDID file");
    println!("    --pixeldump <PATH>     Pixel-readback tool path\n");
    println!("COMMANDS:");
    println!("    status                  Show plug state of every port");
    println!("    probe                   List ports with a cable present");
    println!("    plug <PORT>             Assert HPD, emulating a plug");
    println!("    unplug <PORT>           Deassert HPD, emulating an unplug");
    println!("    pulse <PORT> <TD> <TA> <COUNT> <END>");
    println!("                            Repeat HPD pulses: TD/TA deassert/assert");
    println!("                            widths in usec, END is 0 (low) or 1 (high)");
    println!("    read-edid <PORT> <FILE>   Dump the port's EDID to a file");
    println!("    write-edid <PORT> <FILE>  Load a 256-byte EDID onto the port");
    println!("    resolution <PORT>       Detect the source resolution");
    println!("    capture <PORT> <N> [X Y W H]");
    println!("                            Capture N frames (optionally cropped)");
    println!("                            and print the per-frame checksums");
    println!("    vga-mode <MODE>         Fix the VGA timing (auto, 640x480,");
    println!("                            800x600, 1024x768, 1280x1024, 1920x1080)\n");
    println!("PORTS:");
    println!("    dp1, dp2, hdmi, vga");
}

fn parse_port(value: &str) -> Result<PortId, Box<dyn std::error::Error>> {
    PortId::from_str(value).ok_or_else(|| {
        eprintln!("Error: unknown port '{value}'");
        eprintln!("Valid ports: dp1, dp2, hdmi, vga");
        "invalid port".into()
    })
}

fn parse_num(arg: &str, value: &str) -> Result<u64, Box<dyn std::error::Error>> {
    value.parse().map_err(|_| {
        eprintln!("Error: invalid number '{value}' for {arg}");
        "invalid number".into()
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_usage();
        return Ok(());
    }

    let mut config = Config::default();
    let mut i = 1;
    while i < args.len() && args[i].starts_with("--") {
        if i + 1 >= args.len() {
            eprintln!("Error: {} requires a value", args[i]);
            return Err("missing option value".into());
        }
        let value = &args[i + 1];
        match args[i].as_str() {
            "--mem" => config.mem_path = value.clone(),
            "--i2c-bus" => config.i2c_bus = parse_num("--i2c-bus", value)? as u32,
            "--default-edid" => config.default_edid_path = value.into(),
            "--pixeldump" => config.pixeldump_path = value.into(),
            other => {
                eprintln!("Error: unknown option '{other}'");
                print_usage();
                return Err("invalid option".into());
            }
        }
        i += 2;
    }

    let command = match args.get(i) {
        Some(command) => command.as_str(),
        None => {
            print_usage();
            return Err("missing command".into());
        }
    };
    let rest = &args[i + 1..];

    let mem = Rc::new(MappedRegisterBank::open(&config.mem_path)?);
    let bus = Rc::new(DevI2cBus::open(config.i2c_bus)?);
    let mut driver = ChameleonDriver::new(mem, bus, config)?;

    match command {
        "status" => {
            for port in driver.supported_ports() {
                println!(
                    "{port}: {} ({})",
                    if driver.is_plugged(port)? { "plugged" } else { "unplugged" },
                    driver.connector_type(port),
                );
            }
        }
        "probe" => {
            for port in driver.probe_inputs()? {
                println!("{port}");
            }
        }
        "plug" => {
            let port = parse_port(rest.first().ok_or("plug requires a port")?)?;
            driver.plug(port)?;
            println!("{port} plugged");
        }
        "unplug" => {
            let port = parse_port(rest.first().ok_or("unplug requires a port")?)?;
            driver.unplug(port)?;
            println!("{port} unplugged");
        }
        "pulse" => {
            if rest.len() != 5 {
                eprintln!("Error: pulse requires PORT TD TA COUNT END");
                return Err("missing pulse arguments".into());
            }
            let port = parse_port(&rest[0])?;
            let deassert_us = parse_num("TD", &rest[1])?;
            let assert_us = parse_num("TA", &rest[2])?;
            let repeat = parse_num("COUNT", &rest[3])? as u32;
            let end_level = HpdLevel::from_str(&rest[4]).ok_or_else(|| {
                eprintln!("Error: END must be 0 (low) or 1 (high)");
                "invalid end level"
            })?;
            driver.fire_hpd_pulse(port, deassert_us, Some(assert_us), repeat, end_level)?;
            println!("fired {repeat} pulse(s) on {port}");
        }
        "read-edid" => {
            let port = parse_port(rest.first().ok_or("read-edid requires a port")?)?;
            let path = rest.get(1).ok_or("read-edid requires a file")?;
            std::fs::write(path, driver.read_edid(port)?)?;
            println!("EDID of {port} written to {path}");
        }
        "write-edid" => {
            let port = parse_port(rest.first().ok_or("write-edid requires a port")?)?;
            let path = rest.get(1).ok_or("write-edid requires a file")?;
            let id = driver.create_edid(&std::fs::read(path)?)?;
            driver.apply_edid(port, id)?;
            driver.destroy_edid(id)?;
            println!("EDID from {path} applied to {port}");
        }
        "resolution" => {
            let port = parse_port(rest.first().ok_or("resolution requires a port")?)?;
            let (width, height) = driver.detect_resolution(port)?;
            println!("{width}x{height}");
        }
        "capture" => {
            if rest.len() != 2 && rest.len() != 6 {
                eprintln!("Error: capture requires PORT N [X Y W H]");
                return Err("missing capture arguments".into());
            }
            let port = parse_port(&rest[0])?;
            let total = parse_num("N", &rest[1])? as u32;
            let crop = if rest.len() == 6 {
                Some(CropRect {
                    x: parse_num("X", &rest[2])? as u32,
                    y: parse_num("Y", &rest[3])? as u32,
                    width: parse_num("W", &rest[4])? as u32,
                    height: parse_num("H", &rest[5])? as u32,
                })
            } else {
                None
            };
            driver.capture_video(port, total, crop)?;
            let (width, height) = driver.captured_resolution()?;
            println!("captured {total} frame(s) at {width}x{height}");
            for (index, hash) in driver.captured_checksums(0, total)?.iter().enumerate() {
                let hash: Vec<String> = hash.iter().map(|h| format!("{h:04x}")).collect();
                println!("frame {index}: {}", hash.join(" "));
            }
        }
        "vga-mode" => {
            let value = rest.first().ok_or("vga-mode requires a mode")?;
            let mode = if value == "auto" {
                None
            } else {
                Some(VgaMode::from_str(value).ok_or_else(|| {
                    eprintln!("Error: unknown VGA mode '{value}'");
                    "invalid mode"
                })?)
            };
            driver.set_vga_mode(PortId::Vga, mode)?;
            println!("VGA mode set to {value}");
        }
        other => {
            eprintln!("Error: unknown command '{other}'");
            print_usage();
            return Err("invalid command".into());
        }
    }

    Ok(())
}
