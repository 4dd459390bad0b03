//! User-Friendly Error Formatting
//!
//! Provides user-friendly error messages with troubleshooting hints
//! for common error scenarios.

use std::fmt::Write;

/// Format error for user consumption
///
/// Takes technical error and produces user-friendly message with
/// troubleshooting steps and context.
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    // Header
    writeln!(&mut output).ok();
    writeln!(
        &mut output,
        "╔════════════════════════════════════════════════════════════╗"
    )
    .ok();
    writeln!(
        &mut output,
        "║                     ERROR                                  ║"
    )
    .ok();
    writeln!(
        &mut output,
        "╚════════════════════════════════════════════════════════════╝"
    )
    .ok();
    writeln!(&mut output).ok();

    // Analyze error and provide context
    let error_msg = format!("{:#}", error);

    if error_msg.contains("open display") {
        format_display_error(&mut output, &error_msg);
    } else if error_msg.contains("connection") || error_msg.contains("disconnect") {
        format_connection_error(&mut output, &error_msg);
    } else if error_msg.contains("instance") {
        format_instance_error(&mut output, &error_msg);
    } else if error_msg.contains("config") {
        format_config_error(&mut output, &error_msg);
    } else {
        format_generic_error(&mut output, &error_msg);
    }

    // Technical details
    writeln!(&mut output).ok();
    writeln!(
        &mut output,
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━"
    )
    .ok();
    writeln!(&mut output, "Technical Details:").ok();
    writeln!(&mut output).ok();
    writeln!(&mut output, "{:#}", error).ok();
    writeln!(&mut output).ok();

    // Footer with help
    writeln!(
        &mut output,
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━"
    )
    .ok();
    writeln!(&mut output, "Need Help?").ok();
    writeln!(
        &mut output,
        "  - Run with --verbose for detailed logs: lamco-x11-screen -vv"
    )
    .ok();
    writeln!(
        &mut output,
        "  - Report issues: https://github.com/lamco-admin/lamco-x11-screen/issues"
    )
    .ok();
    writeln!(
        &mut output,
        "╚════════════════════════════════════════════════════════════╝"
    )
    .ok();

    output
}

fn format_display_error(output: &mut String, _error: &str) {
    writeln!(output, "Cannot Open X Display").ok();
    writeln!(output).ok();
    writeln!(output, "Could not connect to the X server.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. DISPLAY is not set or wrong").ok();
    writeln!(output, "     → Check: echo $DISPLAY").ok();
    writeln!(output, "     → Or pass it: lamco-x11-screen --display :0").ok();
    writeln!(output).ok();
    writeln!(output, "  2. No permission to connect").ok();
    writeln!(output, "     → Check: echo $XAUTHORITY").ok();
    writeln!(output, "     → Run as the user that owns the session").ok();
    writeln!(output, "     → Or allow local clients: xhost +SI:localuser:$USER").ok();
    writeln!(output).ok();
    writeln!(output, "  3. X server is not running").ok();
    writeln!(output, "     → Check: ls /tmp/.X11-unix/").ok();
    writeln!(output, "     → For headless use: Xvfb :99 &").ok();
}

fn format_connection_error(output: &mut String, _error: &str) {
    writeln!(output, "X Connection Lost").ok();
    writeln!(output).ok();
    writeln!(output, "The X server closed the connection.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. The session ended or the X server restarted").ok();
    writeln!(output, "     → Start again once the session is back").ok();
    writeln!(output).ok();
    writeln!(output, "  2. The server killed this client").ok();
    writeln!(output, "     → Check the X server log (Xorg.0.log)").ok();
    writeln!(output, "     → Look for xkill or a window manager kill").ok();
}

fn format_instance_error(output: &mut String, _error: &str) {
    writeln!(output, "Screen Already Active").ok();
    writeln!(output).ok();
    writeln!(output, "Only one screen can exist per process.").ok();
    writeln!(output).ok();
    writeln!(output, "  → Drop the existing screen before creating another").ok();
}

fn format_config_error(output: &mut String, _error: &str) {
    writeln!(output, "Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "Problem with configuration file.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Configuration file not found").ok();
    writeln!(
        output,
        "     → Specify: lamco-x11-screen -c /path/to/config.toml"
    )
    .ok();
    writeln!(output).ok();
    writeln!(output, "  2. Invalid TOML syntax").ok();
    writeln!(output, "     → Check for typos, missing quotes, etc.").ok();
    writeln!(output).ok();
    writeln!(output, "  3. Invalid values").ok();
    writeln!(output, "     → event_loop.wait_strategy: auto, poll or sleep").ok();
    writeln!(output, "     → Intervals and timeouts must be greater than 0").ok();
}

fn format_generic_error(output: &mut String, error: &str) {
    writeln!(output, "Screen Error").ok();
    writeln!(output).ok();
    writeln!(output, "An error occurred while running the screen.").ok();
    writeln!(output).ok();
    writeln!(output, "Error: {}", error).ok();
    writeln!(output).ok();
    writeln!(output, "Troubleshooting:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Verify the X server answers:").ok();
    writeln!(output, "     → xdpyinfo | head").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Check the session type:").ok();
    writeln!(output, "     → echo $XDG_SESSION_TYPE").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScreenError;

    #[test]
    fn test_format_display_error() {
        let error = anyhow::Error::new(ScreenError::OpenFailure {
            display: ":9".into(),
            reason: "no such display".into(),
        });
        let formatted = format_user_error(&error);
        assert!(formatted.contains("ERROR"));
        assert!(formatted.contains("Cannot Open X Display"));
        assert!(formatted.contains(":9"));
    }

    #[test]
    fn test_connection_error_formatting() {
        let error = anyhow::Error::new(ScreenError::Connection("broken pipe".into()));
        let formatted = format_user_error(&error);
        assert!(formatted.contains("X Connection Lost"));
    }

    #[test]
    fn test_config_error_formatting() {
        let error = anyhow::anyhow!("Failed to parse config file");
        let formatted = format_user_error(&error);
        assert!(formatted.contains("Configuration Error"));
    }
}
