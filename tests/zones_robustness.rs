use std::sync::atomic::AtomicBool;

use contact_zones::models::zones::{OperatorContext, OperatorSchedule};
use contact_zones::{
    Adjacency, ChainConstraints, ChainOutcome, Confounder, FeatureTensor, InitConfig, McmcConfig,
    Operator, OperatorFamily, Proposal, Sample, WarmupConfig, ZoneChain, ZoneModelConfig, ZoneModelInput,
    ZonePriorConfig, ZoneSamplerConfig, ZonesError, sample_zones, sample_zones_from,
    sample_zones_multi_chain,
};
use faer::Mat;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn path_input(n_sites: usize) -> ZoneModelInput {
    let observations = (0..n_sites)
        .map(|site| vec![Some(site % 2), Some(usize::from(site < n_sites / 2)), None])
        .collect();
    let features =
        FeatureTensor::new(2, vec![vec![true, true]; 3], observations).expect("valid features");
    let edges = (1..n_sites).map(|site| (site - 1, site)).collect::<Vec<_>>();
    let adjacency = Adjacency::from_edges(n_sites, &edges).expect("valid path");
    let universal = Confounder::from_assignments("universal", 1, vec![Some(0); n_sites])
        .expect("valid universal");
    ZoneModelInput::new(features, adjacency, vec![universal])
}

fn config(sample_source: bool) -> ZoneSamplerConfig {
    ZoneSamplerConfig {
        mcmc: McmcConfig {
            iterations: 200,
            warmup_steps: 50,
            thin: 5,
            seed: 11,
        },
        model: ZoneModelConfig {
            n_clusters: 1,
            min_size: 2,
            max_size: 5,
            sample_source,
        },
        init: InitConfig {
            initial_size: 3,
            max_attempts: 100,
        },
        warmup: WarmupConfig {
            chains: 2,
            ..WarmupConfig::default()
        },
        ..ZoneSamplerConfig::default()
    }
}

#[test]
fn marginalised_sources_never_schedule_gibbs_operators() {
    let input = path_input(12);
    let config = config(false);
    let schedule = OperatorSchedule::for_model(config.model, config.operators, 1)
        .expect("schedule should build");
    assert!(schedule.weight(Operator::GibbsSource).abs() < f64::EPSILON);
    assert!(schedule.weight(Operator::AlterWeights) > 0.0);

    let run = sample_zones(&input, config).expect("sampling should succeed");
    assert_eq!(run.trace.len(), 40);
    for draw in &run.trace.draws {
        assert!(!draw.sample.has_source());
        assert!(draw.log_likelihood.is_finite());
    }
}

#[test]
fn model_without_clusters_runs_on_confounders_alone() {
    let input = path_input(8);
    let config = ZoneSamplerConfig {
        model: ZoneModelConfig {
            n_clusters: 0,
            ..config(true).model
        },
        ..config(true)
    };
    let report = sample_zones_multi_chain(&input, config, None, None).expect("run should start");
    assert!(report.failed_chains().is_empty());
    for run in report.completed() {
        assert!(run.trace.draws.iter().all(|draw| draw.sample.n_clusters() == 0));
        assert!(
            run.diagnostics
                .operators
                .iter()
                .all(|summary| summary.family != OperatorFamily::Structural)
        );
    }
    let convergence = report.convergence.expect("convergence summary");
    assert!(convergence.cluster_size_split_rhat.is_empty());
}

#[test]
fn resumed_chain_starts_from_the_saved_state() {
    let input = path_input(10);
    let config = config(false);
    let first = sample_zones(&input, config).expect("first run");
    let saved = first.trace.last_sample().expect("a retained draw").clone();

    let schedule = OperatorSchedule::for_model(config.model, config.operators, 1).expect("schedule");
    let chain = ZoneChain::new(
        0,
        &input,
        config,
        schedule,
        config.nominal_constraints(),
        99,
        Some(&saved),
    )
    .expect("resume should succeed");
    assert_eq!(chain.sample().clusters(), saved.clusters());
    for feature in 0..input.n_features() {
        for component in 0..input.n_sources() {
            let resumed = chain.sample().weights()[(feature, component)];
            let stored = saved.weights()[(feature, component)];
            assert!((resumed - stored).abs() < 1.0e-12);
        }
    }

    let resumed = sample_zones_from(&input, config, &saved).expect("resumed run");
    assert_eq!(resumed.trace.len(), config.mcmc.retained_draws());
}

#[test]
fn resume_with_wrong_shape_is_rejected() {
    let input = path_input(10);
    let other = path_input(12);
    let config = config(false);
    let saved = sample_zones(&other, config)
        .expect("run")
        .trace
        .last_sample()
        .expect("a retained draw")
        .clone();
    assert!(matches!(
        sample_zones_from(&input, config, &saved),
        Err(ZonesError::ResumeMismatch(_))
    ));
}

fn resume_sample(
    cluster: Vec<bool>,
    cluster_effect: Mat<f64>,
    confounding_effect: Mat<f64>,
) -> Sample {
    Sample::new(
        6,
        vec![cluster],
        Mat::from_fn(3, 2, |_, _| 0.5),
        vec![cluster_effect],
        vec![vec![confounding_effect]],
        None,
    )
}

fn uniform(rows: usize, cols: usize) -> Mat<f64> {
    Mat::from_fn(rows, cols, |_, _| 1.0 / 2.0)
}

fn assert_resume_mismatch(resume: &Sample) {
    let result = sample_zones_from(&path_input(6), config(false), resume);
    assert!(
        matches!(result, Err(ZonesError::ResumeMismatch(_))),
        "expected a resume mismatch, got {result:?}"
    );
}

#[test]
fn well_formed_resume_sample_is_accepted() {
    let resume = resume_sample(
        vec![false, true, true, true, false, false],
        uniform(3, 2),
        uniform(3, 2),
    );
    let run = sample_zones_from(&path_input(6), config(false), &resume).expect("resume");
    assert_eq!(run.trace.len(), config(false).mcmc.retained_draws());
}

#[test]
fn resume_with_short_cluster_row_is_rejected() {
    assert_resume_mismatch(&resume_sample(vec![true, true], uniform(3, 2), uniform(3, 2)));
}

#[test]
fn resume_with_cluster_effect_missing_features_is_rejected() {
    assert_resume_mismatch(&resume_sample(
        vec![false, true, true, true, false, false],
        uniform(1, 2),
        uniform(3, 2),
    ));
}

#[test]
fn resume_with_misshapen_confounding_effect_is_rejected() {
    let cluster = vec![false, true, true, true, false, false];
    assert_resume_mismatch(&resume_sample(cluster.clone(), uniform(3, 2), uniform(2, 2)));
    assert_resume_mismatch(&resume_sample(cluster, uniform(3, 2), uniform(3, 3)));
}

#[test]
fn resume_with_oversized_cluster_is_rejected() {
    assert_resume_mismatch(&resume_sample(vec![true; 6], uniform(3, 2), uniform(3, 2)));
}

#[test]
fn raised_stop_flag_cancels_every_chain() {
    let input = path_input(10);
    let stop = AtomicBool::new(true);
    let report =
        sample_zones_multi_chain(&input, config(true), None, Some(&stop)).expect("run should start");
    assert_eq!(report.chains.len(), 2);
    for outcome in &report.chains {
        let ChainOutcome::Completed(run) = outcome else {
            panic!("cancelled chains still complete");
        };
        assert!(run.diagnostics.cancelled);
        assert!(run.trace.is_empty());
    }
    assert!(report.convergence.is_none());
}

#[test]
fn invalid_configuration_fails_before_any_chain_starts() {
    let input = path_input(10);
    let zero_chains = ZoneSamplerConfig {
        warmup: WarmupConfig {
            chains: 0,
            ..WarmupConfig::default()
        },
        ..config(true)
    };
    let error = sample_zones_multi_chain(&input, zero_chains, None, None)
        .expect_err("zero chains should be rejected");
    assert!(error.is_configuration());

    let inverted = ZoneSamplerConfig {
        model: ZoneModelConfig {
            min_size: 6,
            max_size: 4,
            ..config(true).model
        },
        ..config(true)
    };
    assert!(matches!(
        sample_zones(&input, inverted),
        Err(ZonesError::InvalidSizeBounds { .. })
    ));
}

#[test]
fn cluster_effect_draws_match_the_conjugate_posterior_mean() {
    let input = path_input(6);
    let members = vec![true, true, true, true, false, false];
    let n_features = input.n_features();
    let uniform = Mat::from_fn(n_features, 2, |_, _| 0.5);
    let sample = Sample::new(
        6,
        vec![members.clone()],
        Mat::from_fn(n_features, 2, |_, _| 0.5),
        vec![uniform.clone()],
        vec![vec![uniform]],
        Some(
            (0..6)
                .flat_map(|site| vec![usize::from(!members[site]); n_features])
                .collect(),
        ),
    );
    let context = OperatorContext {
        input: &input,
        model: config(true).model,
        priors: ZonePriorConfig::default(),
        tuning: config(true).tuning,
        constraints: ChainConstraints {
            max_size: 5,
            p_grow_connected: 0.85,
        },
    };

    let mut rng = StdRng::seed_from_u64(404);
    let draws = 4_000_u32;
    let mut total = [0.0_f64; 2];
    for _ in 0..draws {
        let Proposal::Exact(next) = Operator::GibbsClusterEffect
            .propose(&context, &sample, &mut rng)
            .expect("draw should succeed")
        else {
            panic!("cluster effect draws are exact");
        };
        total[0] += next.cluster_effect(0)[(1, 0)];
        total[1] += next.cluster_effect(0)[(1, 1)];
    }

    // Feature 1 among members 0..=3 is 1,1,1,0; with a flat prior the
    // conditional is Dirichlet(2, 4).
    let mean = total.map(|value| value / f64::from(draws));
    approx::assert_abs_diff_eq!(mean[0], 1.0 / 3.0, epsilon = 0.02);
    approx::assert_abs_diff_eq!(mean[1], 2.0 / 3.0, epsilon = 0.02);

    // Feature 2 is never observed, so the draw is from the prior.
    let Proposal::Exact(prior_draw) = Operator::GibbsClusterEffect
        .propose(&context, &sample, &mut rng)
        .expect("draw should succeed")
    else {
        panic!("cluster effect draws are exact");
    };
    let row_sum = prior_draw.cluster_effect(0)[(2, 0)] + prior_draw.cluster_effect(0)[(2, 1)];
    approx::assert_abs_diff_eq!(row_sum, 1.0, epsilon = 1.0e-12);
}

#[test]
fn chains_fail_independently_when_clusters_cannot_be_placed() {
    let input = path_input(5);
    let crowded = ZoneSamplerConfig {
        model: ZoneModelConfig {
            n_clusters: 2,
            ..config(true).model
        },
        ..config(true)
    };
    let report = sample_zones_multi_chain(&input, crowded, None, None).expect("run should start");
    assert_eq!(report.failed_chains(), vec![0, 1]);
    assert!(report.completed().next().is_none());
}
