use contact_zones::{
    Adjacency, Confounder, FeatureTensor, McmcConfig, WarmupConfig, ZoneModelConfig,
    ZoneModelInput, ZoneSamplerConfig, render_convergence_table, render_operator_table,
    sample_zones_multi_chain, summarize_posterior,
};

const WIDTH: usize = 8;
const HEIGHT: usize = 6;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let input = build_synthetic_input()?;
    let config = ZoneSamplerConfig {
        mcmc: McmcConfig {
            iterations: 4_000,
            warmup_steps: 1_500,
            thin: 20,
            seed: 2_026,
        },
        model: ZoneModelConfig {
            n_clusters: 1,
            min_size: 3,
            max_size: 12,
            sample_source: true,
        },
        warmup: WarmupConfig {
            chains: 4,
            ..WarmupConfig::default()
        },
        ..ZoneSamplerConfig::default()
    };

    let report = sample_zones_multi_chain(&input, config, None, None)?;
    println!(
        "Chains: {} completed, {} failed",
        report.completed().count(),
        report.failed_chains().len()
    );

    for summary in report.pooled_operator_stats() {
        println!(
            "  {:<28} accepted {:>6} / rejected {:>6} ({:.3})",
            summary.name,
            summary.sampling.accepted,
            summary.sampling.rejected(),
            summary.sampling.acceptance_rate()
        );
    }

    if let Some(run) = report.completed().next() {
        println!("{}", render_operator_table(&run.diagnostics));

        let summary = summarize_posterior(&run.trace);
        if let Some(size) = summary.cluster_size.first() {
            println!(
                "Zone size mean={:.2}, 95% CrI [{:.0}, {:.0}]",
                size.mean, size.q025, size.q975
            );
        }
        if let Some(membership) = summary.membership.first() {
            println!("Membership frequency:");
            for row in membership.chunks(WIDTH) {
                let line = row
                    .iter()
                    .map(|frequency| format!("{frequency:4.2}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("  {line}");
            }
        }
    }

    if let Some(convergence) = &report.convergence {
        println!("{}", render_convergence_table(convergence));
    }

    Ok(())
}

/// Grid of villages with two language families and one planted contact zone.
fn build_synthetic_input() -> Result<ZoneModelInput, Box<dyn std::error::Error>> {
    let n_sites = WIDTH * HEIGHT;
    let n_features = 10;
    let zone = |site: usize| {
        let (row, col) = (site / WIDTH, site % WIDTH);
        (2..=4).contains(&row) && (3..=5).contains(&col)
    };
    let family = |site: usize| usize::from(site % WIDTH >= WIDTH / 2);

    let observations = (0..n_sites)
        .map(|site| {
            (0..n_features)
                .map(|feature| {
                    if (site * 7 + feature * 3) % 23 == 0 {
                        None
                    } else if zone(site) && feature % 3 != 0 {
                        Some(2)
                    } else {
                        Some((family(site) + feature + site % 3 / 2) % 2)
                    }
                })
                .collect()
        })
        .collect();
    let features = FeatureTensor::new(3, vec![vec![true, true, true]; n_features], observations)?;

    let mut edges = Vec::new();
    for site in 0..n_sites {
        if site % WIDTH + 1 < WIDTH {
            edges.push((site, site + 1));
        }
        if site + WIDTH < n_sites {
            edges.push((site, site + WIDTH));
        }
    }
    let adjacency = Adjacency::from_edges(n_sites, &edges)?;

    let universal = Confounder::from_assignments("universal", 1, vec![Some(0); n_sites])?;
    let families = Confounder::from_assignments(
        "family",
        2,
        (0..n_sites).map(|site| Some(family(site))).collect(),
    )?;
    let input = ZoneModelInput::new(features, adjacency, vec![universal, families]);
    input.validate()?;
    Ok(input)
}
