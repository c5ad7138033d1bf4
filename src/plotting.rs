use crate::types::SweepResult;
use textplots::{Chart, Plot};

/// Determine the best scale and unit for a given maximum value
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value >= 1e6 {
        (1e-6, "M")
    } else if max_value >= 1e3 {
        (1e-3, "k")
    } else if max_value >= 1.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else {
        (1e6, "μ")
    }
}

/// Render impedance magnitude against log10(frequency) in the terminal.
/// A quick-look Bode plot for headless runs; the finalized buffer is read
/// only.
pub fn plot_sweep_magnitude(result: &SweepResult) -> Result<(), Box<dyn std::error::Error>> {
    let rows = result.rows();
    if rows.is_empty() {
        return Err("Cannot plot empty sweep".into());
    }

    let max_magnitude = rows
        .iter()
        .fold(0.0_f64, |acc, row| acc.max(row.magnitude()));
    let (scale, unit) = determine_scale(max_magnitude);

    let frame: Vec<(f32, f32)> = rows
        .iter()
        .map(|row| {
            (
                row.frequency.log10() as f32,
                (row.magnitude() * scale) as f32,
            )
        })
        .collect();

    let x_min = frame.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let x_max = frame.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);

    println!("Impedance Magnitude");
    println!("X-axis: log10(f/Hz) | Y-axis: {unit}Ω");
    println!("{} accepted samples", rows.len());

    Chart::new(140, 60, x_min, x_max)
        .lineplot(&textplots::Shape::Lines(&frame))
        .nice();

    println!("log10(Frequency) →");
    Ok(())
}

/// Render the Nyquist locus (negated imaginary part against real part).
pub fn plot_nyquist(result: &SweepResult) -> Result<(), Box<dyn std::error::Error>> {
    let rows = result.rows();
    if rows.is_empty() {
        return Err("Cannot plot empty sweep".into());
    }

    let max_real = rows.iter().fold(0.0_f64, |acc, row| acc.max(row.z_real));
    let (scale, unit) = determine_scale(max_real);

    let frame: Vec<(f32, f32)> = rows
        .iter()
        .map(|row| ((row.z_real * scale) as f32, (row.z_imag_neg * scale) as f32))
        .collect();

    let x_max = frame.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);

    println!("Nyquist Plot");
    println!("X-axis: Z' | Y-axis: -Z'' | units: {unit}Ω");

    Chart::new(140, 60, 0.0, x_max)
        .lineplot(&textplots::Shape::Points(&frame))
        .nice();

    println!("Z' →");
    Ok(())
}
