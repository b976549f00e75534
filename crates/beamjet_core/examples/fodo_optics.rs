//! Closed orbit and lattice functions of a thin-lens FODO ring with a
//! misaligned focusing quadrupole.
//!
//! Run with `RUST_LOG=beamjet_core=debug` to follow the solver.

use anyhow::{Context, Result};
use beamjet_core::optics::ChromaticityMethod;
use beamjet_core::traits::Lattice;
use beamjet_core::{
    compute_lattice_functions, find_closed_orbit, Beamline, ClosedOrbitSettings, Element,
    ElementKind, LatticeFunctionSettings,
};
use tracing_subscriber::EnvFilter;

fn ring(cells: usize) -> Beamline {
    let mut line = Beamline::new("fodo ring");
    for cell in 0..cells {
        line.push(Element::new(
            format!("qf{cell}"),
            ElementKind::ThinQuadrupole {
                k1l: 0.8,
                x_offset: if cell == 0 { 5e-4 } else { 0.0 },
                y_offset: 0.0,
            },
        ));
        line.push(Element::bend(format!("b{cell}a"), 0.1));
        line.push(Element::drift(format!("o{cell}a"), 1.0));
        line.push(Element::quadrupole(format!("qd{cell}"), -0.8));
        line.push(Element::sextupole(format!("sd{cell}"), -0.5));
        line.push(Element::bend(format!("b{cell}b"), 0.1));
        line.push(Element::drift(format!("o{cell}b"), 1.0));
    }
    line
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let line = ring(8);
    let orbit = find_closed_orbit(&line, &[0.0; 6], &ClosedOrbitSettings::default())
        .context("closed orbit search failed")?;
    println!(
        "closed orbit after {} iterations: x = {:.3e}, npx = {:.3e}",
        orbit.iterations, orbit.state[0], orbit.state[3]
    );

    let settings = LatticeFunctionSettings {
        chromaticity: ChromaticityMethod::JetDerivative,
        ..LatticeFunctionSettings::default()
    };
    let table = compute_lattice_functions(&line, &orbit, &settings)
        .context("lattice function extraction failed")?;

    println!(
        "tunes: {:.5} / {:.5}   chromaticity: {:.4} / {:.4}",
        table.ring.tune.hor,
        table.ring.tune.ver,
        table.ring.chromaticity.hor,
        table.ring.chromaticity.ver
    );
    println!("{:>8} {:>8} {:>10} {:>10} {:>10}", "element", "s", "beta_x", "beta_y", "eta_x");
    for record in table.iter().filter(|r| r.element_name.starts_with('q')) {
        println!(
            "{:>8} {:>8.3} {:>10.4} {:>10.4} {:>10.4}",
            record.element_name,
            record.arc_length,
            record.beta.hor,
            record.beta.ver,
            record.dispersion.hor
        );
    }
    println!("circumference: {:.3} m", line.total_length());
    Ok(())
}
