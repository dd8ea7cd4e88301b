use contact_zones::{
    Adjacency, Confounder, FeatureTensor, InitConfig, McmcConfig, WarmupConfig, ZoneModelConfig,
    ZoneModelInput, ZoneSamplerConfig, membership_frequency, render_convergence_table,
    render_operator_table, sample_zones, sample_zones_multi_chain, summarize_posterior,
};

const COLUMNS: usize = 5;
const ROWS: usize = 4;
const ZONE: [usize; 5] = [6, 7, 8, 11, 12];

fn grid_edges() -> Vec<(usize, usize)> {
    let mut edges = Vec::new();
    for row in 0..ROWS {
        for col in 0..COLUMNS {
            let site = row * COLUMNS + col;
            if col + 1 < COLUMNS {
                edges.push((site, site + 1));
            }
            if row + 1 < ROWS {
                edges.push((site, site + COLUMNS));
            }
        }
    }
    edges
}

/// A 5x4 grid where five connected sites share a state that no other site shows.
fn planted_zone_input() -> ZoneModelInput {
    let n_sites = COLUMNS * ROWS;
    let n_features = 6;
    let mut applicable = vec![vec![true, true, true]; n_features];
    applicable[0] = vec![true, true, false];

    let observations = (0..n_sites)
        .map(|site| {
            (0..n_features)
                .map(|feature| {
                    if site == 0 && feature == 3 {
                        None
                    } else if ZONE.contains(&site) {
                        Some(if feature == 0 { 1 } else { 2 })
                    } else {
                        Some((site + feature) % 2)
                    }
                })
                .collect()
        })
        .collect();
    let features = FeatureTensor::new(3, applicable, observations).expect("valid features");
    let adjacency = Adjacency::from_edges(n_sites, &grid_edges()).expect("valid grid");

    let universal = Confounder::from_assignments("universal", 1, vec![Some(0); n_sites])
        .expect("valid universal");
    let family = Confounder::from_assignments(
        "family",
        2,
        (0..n_sites)
            .map(|site| match site % COLUMNS {
                4 => None,
                col if col < 2 => Some(0),
                _ => Some(1),
            })
            .collect(),
    )
    .expect("valid family");
    ZoneModelInput::new(features, adjacency, vec![universal, family])
}

fn config(chains: usize) -> ZoneSamplerConfig {
    ZoneSamplerConfig {
        mcmc: McmcConfig {
            iterations: 2_000,
            warmup_steps: 1_000,
            thin: 10,
            seed: 2_026,
        },
        model: ZoneModelConfig {
            n_clusters: 1,
            min_size: 3,
            max_size: 8,
            sample_source: true,
        },
        init: InitConfig {
            initial_size: 3,
            max_attempts: 200,
        },
        warmup: WarmupConfig {
            chains,
            ..WarmupConfig::default()
        },
        ..ZoneSamplerConfig::default()
    }
}

#[test]
fn planted_zone_dominates_membership() {
    let input = planted_zone_input();
    let run = sample_zones(&input, config(1)).expect("sampling should succeed");
    assert_eq!(run.trace.len(), 200);

    let membership = membership_frequency(&run.trace);
    assert_eq!(membership.len(), 1);
    let inside = ZONE.iter().map(|site| membership[0][*site]).sum::<f64>() / 5.0;
    let outside = (0..input.n_sites())
        .filter(|site| !ZONE.contains(site))
        .map(|site| membership[0][site])
        .sum::<f64>()
        / 15.0;
    assert!(
        inside > outside,
        "zone sites {inside:.3} should beat background {outside:.3}"
    );

    for draw in &run.trace.draws {
        let members = draw.sample.cluster(0);
        assert!((3..=8).contains(&draw.sample.cluster_size(0)));
        for site in 0..input.n_sites() {
            for feature in 0..input.n_features() {
                if draw.sample.source(site, feature) == Some(0) {
                    assert!(members[site], "site {site} attributed to an absent cluster");
                }
            }
        }
    }
}

#[test]
fn multi_chain_workflow_produces_summaries_and_tables() {
    let input = planted_zone_input();
    let config = ZoneSamplerConfig {
        mcmc: McmcConfig {
            iterations: 600,
            warmup_steps: 300,
            ..config(3).mcmc
        },
        ..config(3)
    };
    let report = sample_zones_multi_chain(&input, config, None, None).expect("run should start");

    assert_eq!(report.chains.len(), 3);
    assert!(report.failed_chains().is_empty());
    for run in report.completed() {
        assert_eq!(run.trace.len(), config.mcmc.retained_draws());
        assert_eq!(run.diagnostics.warmup_steps_completed, 300);
        assert!(run.diagnostics.warmup_constraints.max_size >= 3);
        let table = render_operator_table(&run.diagnostics).to_string();
        assert!(table.contains("gibbs"));
    }

    let convergence = report.convergence.as_ref().expect("convergence summary");
    assert_eq!(convergence.chain_count, 3);
    assert!(convergence.max_split_rhat.is_some_and(f64::is_finite));
    assert!(render_convergence_table(convergence).to_string().contains("log-likelihood"));

    let first = report.completed().next().expect("a completed chain");
    let summary = summarize_posterior(&first.trace);
    assert_eq!(summary.draw_count, 60);
    assert_eq!(summary.weights.len(), input.n_features());
    assert_eq!(summary.weights[0].len(), input.n_sources());
    let weight = summary.weights[1][0];
    assert!(weight.q025 <= weight.mean && weight.mean <= weight.q975);
}
