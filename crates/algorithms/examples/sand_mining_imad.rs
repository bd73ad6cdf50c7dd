//! Sand mining demo: iMAD on a synthetic river reach
//!
//! Builds two 4-band (blue, green, red, NIR) acquisitions of a 300x300
//! reach on a 10 m UTM grid. Between the dates a rectangular pit is dug
//! into a sand bar and fills with turbid water. The demo runs iMAD with an
//! early stop and prints the iteration history, the chi-squared summary and
//! how well the change mask separates the pit from the unchanged reach.
//!
//! Run:
//!   cargo run -p sandwatch-algorithms --example sand_mining_imad

use ndarray::Array2;
use sandwatch_algorithms::change::{imad, ImadParams, Termination};
use sandwatch_core::{CRS, GeoTransform, MultibandRaster, Raster};
use std::ops::Range;

const ROWS: usize = 300;
const COLS: usize = 300;
const PIXEL_SIZE: f64 = 10.0;
const PIT_ROWS: Range<usize> = 120..160;
const PIT_COLS: Range<usize> = 60..110;

/// Surface reflectance of (water, sand, vegetation) per band
const WATER: [f64; 4] = [0.06, 0.05, 0.03, 0.02];
const SAND: [f64; 4] = [0.14, 0.18, 0.22, 0.26];
const VEGETATION: [f64; 4] = [0.03, 0.07, 0.04, 0.35];
const TURBID_WATER: [f64; 4] = [0.10, 0.12, 0.11, 0.05];

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .init();

    let transform = GeoTransform::from_gdal([
        352_000.0, PIXEL_SIZE, 0.0, 2_810_000.0, 0.0, -PIXEL_SIZE,
    ]);
    let crs = CRS::from_epsg(32645);

    let before = build_scene(false, &transform, &crs);
    let after = build_scene(true, &transform, &crs);
    println!("Scene: {}x{} pixels, {} bands, {}", COLS, ROWS, before.n_bands(), crs);

    let params = ImadParams {
        max_iterations: 10,
        convergence_tolerance: Some(1e-4),
        ..Default::default()
    };
    let result = match imad(&before, &after, params) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("iMAD failed: {e}");
            std::process::exit(1);
        }
    };

    println!("\nIteration history:");
    for record in &result.history {
        let rho: Vec<String> = record.correlations.iter().map(|r| format!("{r:.4}")).collect();
        let delta = record.max_delta.map(|d| format!("{d:.2e}")).unwrap_or_else(|| "-".into());
        println!(
            "  {:>2}  rho = [{}]  weight sum = {:.1}  max delta = {}",
            record.iteration,
            rho.join(", "),
            record.weight_sum,
            delta
        );
    }
    let how = match result.termination {
        Termination::Converged => "converged",
        Termination::MaxIterations => "hit the iteration cap",
    };
    println!("Stopped after {} iterations ({how})", result.iterations);

    let stats = result.chi_squared.statistics();
    println!(
        "\nChi-squared: min {:.2}, max {:.2}, mean {:.2}",
        stats.min.unwrap_or(f64::NAN),
        stats.max.unwrap_or(f64::NAN),
        stats.mean.unwrap_or(f64::NAN)
    );

    let mask = match result.change_mask(0.001) {
        Ok(mask) => mask,
        Err(e) => {
            eprintln!("change mask failed: {e}");
            std::process::exit(1);
        }
    };

    // Background chi-squared drifts above n as the weights sharpen, so the
    // mask is scored against the known pit instead of quoted as an area
    let (mut hits, mut pit_pixels, mut false_alarms, mut background) = (0usize, 0usize, 0usize, 0usize);
    let (mut chi_pit, mut chi_background) = (0.0, 0.0);
    for ((r, c), &flag) in mask.data().indexed_iter() {
        let chi = result.chi_squared.data()[(r, c)];
        if in_pit(r, c) {
            pit_pixels += 1;
            hits += usize::from(flag == 1.0);
            chi_pit += chi;
        } else {
            background += 1;
            false_alarms += usize::from(flag == 1.0);
            chi_background += chi;
        }
    }
    let pit_ha = pit_pixels as f64 * PIXEL_SIZE * PIXEL_SIZE / 10_000.0;
    println!("\nDug pit: {pit_pixels} pixels ({pit_ha:.1} ha)");
    println!(
        "  mean chi-squared {:.1} in the pit, {:.1} elsewhere",
        chi_pit / pit_pixels as f64,
        chi_background / background as f64
    );
    println!(
        "  at 0.1% significance: {hits} of {pit_pixels} pit pixels flagged ({:.1}%), \
         {false_alarms} of {background} background pixels flagged ({:.1}%)",
        100.0 * hits as f64 / pit_pixels as f64,
        100.0 * false_alarms as f64 / background as f64
    );

    let (x0, y0) = mask.transform().pixel_to_geo(PIT_COLS.start, PIT_ROWS.start);
    let (x1, y1) = mask.transform().pixel_to_geo(PIT_COLS.end - 1, PIT_ROWS.end - 1);
    println!("  pit pixel centres: ({x0:.0}, {y0:.0}) to ({x1:.0}, {y1:.0})");
}

fn in_pit(r: usize, c: usize) -> bool {
    PIT_ROWS.contains(&r) && PIT_COLS.contains(&c)
}

/// River channel, sand bars and vegetated banks with sensor noise.
/// With `dug`, a pit in the sand bar holds turbid water.
fn build_scene(dug: bool, transform: &GeoTransform, crs: &CRS) -> MultibandRaster {
    let bands = (0..4)
        .map(|b| {
            let data = Array2::from_shape_fn((ROWS, COLS), |(r, c)| {
                let surface = if dug && in_pit(r, c) {
                    TURBID_WATER
                } else {
                    land_cover(r, c)
                };
                let gain = if dug { 1.08 } else { 1.0 };
                surface[b] * gain + sensor_noise(r, c, b, dug)
            });
            let mut raster = Raster::from_array(data);
            raster.set_transform(*transform);
            raster.set_crs(Some(crs.clone()));
            raster
        })
        .collect();

    match MultibandRaster::new(bands) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("cannot stack bands: {e}");
            std::process::exit(1);
        }
    }
}

fn land_cover(r: usize, c: usize) -> [f64; 4] {
    let centre = 150.0 + 30.0 * (r as f64 / 40.0).sin();
    let offset = (c as f64 - centre).abs();
    if offset < 25.0 {
        WATER
    } else if offset < 70.0 {
        SAND
    } else {
        VEGETATION
    }
}

fn sensor_noise(r: usize, c: usize, band: usize, later: bool) -> f64 {
    let seed = (r * 7919 + c * 104_729 + band * 1_299_709 + usize::from(later) * 15_485_863) as u64;
    let mut x = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 31;
    (x % 1000) as f64 / 1000.0 * 0.01 - 0.005
}
