//! Command-line options shared by the two entry points

use std::fmt;

#[derive(Debug, Clone)]
pub struct Options {
    pub model: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub socket_path: Option<String>,
    pub auto_connect: bool,
    pub input_gain: f32,
    pub output_gain: f32,
    pub bypass: bool,
    pub normalize: bool,
    pub gate_threshold: f32,
    pub enable_gate: bool,
    pub enable_dc_blocker: bool,
    pub help: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            model: None,
            input_device: None,
            output_device: None,
            socket_path: None,
            auto_connect: true,
            input_gain: 0.0,
            output_gain: 0.0,
            bypass: false,
            normalize: true,
            gate_threshold: -40.0,
            enable_gate: false,
            enable_dc_blocker: false,
            help: false,
        }
    }
}

#[derive(Debug)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Options {
    /// Parse process arguments (without the program name).
    pub fn parse<I: Iterator<Item = String>>(mut args: I) -> Result<Self, ParseError> {
        let mut options = Self::default();

        while let Some(arg) = args.next() {
            let mut value_for = |flag: &str| {
                args.next()
                    .ok_or_else(|| ParseError(format!("{} requires a value", flag)))
            };

            match arg.as_str() {
                "--help" | "-h" => options.help = true,
                "--model" => options.model = Some(value_for("--model")?),
                "--input-device" => options.input_device = Some(value_for("--input-device")?),
                "--output-device" => options.output_device = Some(value_for("--output-device")?),
                "--socket" => options.socket_path = Some(value_for("--socket")?),
                "--no-auto-connect" => options.auto_connect = false,
                "--input-gain" => {
                    options.input_gain = parse_db(&value_for("--input-gain")?, "--input-gain")?
                }
                "--output-gain" => {
                    options.output_gain = parse_db(&value_for("--output-gain")?, "--output-gain")?
                }
                "--bypass" => options.bypass = true,
                "--no-normalize" => options.normalize = false,
                "--gate-threshold" => {
                    options.gate_threshold =
                        parse_db(&value_for("--gate-threshold")?, "--gate-threshold")?
                }
                "--enable-gate" => options.enable_gate = true,
                "--enable-dc-blocker" => options.enable_dc_blocker = true,
                unknown => return Err(ParseError(format!("Unknown option: {}", unknown))),
            }
        }

        Ok(options)
    }
}

fn parse_db(value: &str, flag: &str) -> Result<f32, ParseError> {
    value
        .parse()
        .map_err(|_| ParseError(format!("{} expects a dB value, got '{}'", flag, value)))
}

pub fn print_usage(program: &str) {
    println!("HoopiPi - Headless Neural Guitar Amp\n");
    println!("Usage: {} [options]\n", program);
    println!("Options:");
    println!("  --model PATH          Model file to load into slot 0 (.onnx)");
    println!("  --input-device NAME   Capture device (default: system default)");
    println!("  --output-device NAME  Playback device (default: system default)");
    println!("  --socket PATH         Control socket path (default: {})", crate::control::DEFAULT_SOCKET_PATH);
    println!("  --no-auto-connect     Don't open the default audio devices");
    println!("  --input-gain DB       Input gain in dB (default: 0.0)");
    println!("  --output-gain DB      Output gain in dB (default: 0.0)");
    println!("  --bypass              Start in bypass mode");
    println!("  --no-normalize        Disable output normalization");
    println!("  --gate-threshold DB   Noise gate threshold in dB (default: -40.0)");
    println!("  --enable-gate         Enable noise gate");
    println!("  --enable-dc-blocker   Enable DC blocking filter");
    println!("  --help                Show this help message");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, ParseError> {
        Options::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_defaults() {
        let options = parse(&[]).expect("parse");
        assert!(options.auto_connect);
        assert!(options.normalize);
        assert!(!options.bypass);
        assert_eq!(options.gate_threshold, -40.0);
    }

    #[test]
    fn test_flags_and_values() {
        let options = parse(&[
            "--model",
            "/models/crunch.onnx",
            "--input-gain",
            "-6.5",
            "--enable-gate",
            "--no-normalize",
            "--no-auto-connect",
        ])
        .expect("parse");

        assert_eq!(options.model.as_deref(), Some("/models/crunch.onnx"));
        assert_eq!(options.input_gain, -6.5);
        assert!(options.enable_gate);
        assert!(!options.normalize);
        assert!(!options.auto_connect);
    }

    #[test]
    fn test_unknown_option_rejected() {
        assert!(parse(&["--frobnicate"]).is_err());
    }

    #[test]
    fn test_missing_value_rejected() {
        assert!(parse(&["--model"]).is_err());
        assert!(parse(&["--input-gain", "loud"]).is_err());
    }
}
