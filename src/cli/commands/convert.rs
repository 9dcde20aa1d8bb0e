//! `tmt convert` command - express a tolerance in ppm or another unit

use console::style;
use miette::Result;
use serde::Serialize;

use crate::cli::output::{print_structured, sig, Table};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::units::UnitConverter;
use crate::core::Config;

#[derive(clap::Args, Debug)]
pub struct ConvertArgs {
    /// Value to convert
    #[arg(allow_negative_numbers = true)]
    pub value: f64,

    /// Unit of the value (e.g. mV, %, ppm)
    pub unit: String,

    /// Reference value and unit for relative conversions, e.g. `--nominal 10 V`
    #[arg(long, num_args = 2, value_names = ["VALUE", "UNIT"])]
    pub nominal: Option<Vec<String>>,

    /// Target unit; without it the value is expressed in ppm
    #[arg(long)]
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
struct Conversion {
    value: f64,
    unit: String,
    ppm: Option<f64>,
    result: f64,
    target: String,
    explanation: String,
}

pub fn run(args: ConvertArgs, global: &GlobalOpts) -> Result<()> {
    let config = Config::load();
    let units = config.unit_system();
    let nominal = parse_nominal(args.nominal.as_deref())?;

    let conversion = match (&args.to, &nominal) {
        (Some(target), None) => {
            let result = units
                .convert(args.value, &args.unit, target)
                .map_err(|e| miette::miette!(help = "Relative units need --nominal", "{}", e))?;
            Conversion {
                value: args.value,
                unit: args.unit.clone(),
                ppm: None,
                result,
                target: target.clone(),
                explanation: format!("{} {} = {} {}", args.value, args.unit, result, target),
            }
        }
        (target, nominal) => {
            let (nominal, nominal_unit) = match nominal.clone() {
                Some(n) => n,
                None if units.is_relative(&args.unit) => (1.0, args.unit.clone()),
                None => {
                    return Err(miette::miette!(
                        help = "Use --nominal VALUE UNIT",
                        "converting {} to ppm needs a reference value",
                        args.unit
                    ))
                }
            };
            let ppm = units
                .to_ppm(args.value, &args.unit, nominal, &nominal_unit)
                .map_err(|e| miette::miette!(help = "Use --nominal VALUE UNIT", "{}", e))?;
            match target {
                Some(target) => {
                    let result = units
                        .ppm_to_unit(ppm.value, target, nominal, &nominal_unit)
                        .map_err(|e| miette::miette!("{}", e))?;
                    Conversion {
                        value: args.value,
                        unit: args.unit.clone(),
                        ppm: Some(ppm.value),
                        result,
                        target: target.clone(),
                        explanation: format!(
                            "{}; {} ppm = {} {}",
                            ppm.explanation, ppm.value, result, target
                        ),
                    }
                }
                None => Conversion {
                    value: args.value,
                    unit: args.unit.clone(),
                    ppm: Some(ppm.value),
                    result: ppm.value,
                    target: "ppm".to_string(),
                    explanation: ppm.explanation,
                },
            }
        }
    };

    let format = global.format.resolve(config.default_format.as_deref());
    if print_structured(&conversion, format)? {
        return Ok(());
    }
    if format != OutputFormat::Auto {
        let mut table = Table::new(["Value", "Unit", "Result", "Target"]);
        table.push([
            conversion.value.to_string(),
            conversion.unit.clone(),
            sig(conversion.result, 8),
            conversion.target.clone(),
        ]);
        print!("{}", table.render(format)?);
        return Ok(());
    }

    println!(
        "{} {} {}",
        style(sig(conversion.result, 8)).green(),
        conversion.target,
        style(format!("({})", conversion.explanation)).dim()
    );
    Ok(())
}

fn parse_nominal(raw: Option<&[String]>) -> Result<Option<(f64, String)>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw {
        [value, unit] => {
            let value: f64 = value
                .parse()
                .map_err(|_| miette::miette!("--nominal value '{}' is not a number", value))?;
            Ok(Some((value, unit.clone())))
        }
        _ => Err(miette::miette!("--nominal takes a value and a unit")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nominal() {
        let raw = vec!["10".to_string(), "V".to_string()];
        assert_eq!(parse_nominal(Some(&raw)).unwrap(), Some((10.0, "V".to_string())));
        assert_eq!(parse_nominal(None).unwrap(), None);
        let bad = vec!["ten".to_string(), "V".to_string()];
        assert!(parse_nominal(Some(&bad)).is_err());
    }
}
