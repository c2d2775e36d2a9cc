// Property-Based Testing for transition and dependency lookups

use async_trait::async_trait;
use featureflow::injection::{factory, singleton, DependencyRegistry};
use featureflow::{Event, Feature, FeatureContext, StateType, TransitionRegistry};
use proptest::prelude::*;
use std::sync::Arc;

macro_rules! relay {
    ($($name:ident),*) => {
        $(
            struct $name;

            #[async_trait]
            impl Feature for $name {
                type Input = u8;
                type Output = u8;

                async fn process(&self, input: u8, ctx: FeatureContext<u8>) {
                    ctx.result_event(input, Event::Success);
                }
            }
        )*
    };
}

relay!(S0, S1, S2, S3);

fn state(index: usize) -> StateType {
    match index {
        0 => StateType::of::<S0>(),
        1 => StateType::of::<S1>(),
        2 => StateType::of::<S2>(),
        _ => StateType::of::<S3>(),
    }
}

fn event(index: usize) -> Event {
    [Event::Start, Event::Success, Event::Fail, Event::Progress, Event::Retry][index]
}

fn connect(registry: &mut TransitionRegistry, from: usize, to: usize, on: Event) {
    macro_rules! to_state {
        ($from:ident) => {
            match to {
                0 => { registry.connect(|| $from, || S0).after(on); }
                1 => { registry.connect(|| $from, || S1).after(on); }
                2 => { registry.connect(|| $from, || S2).after(on); }
                _ => { registry.connect(|| $from, || S3).after(on); }
            }
        };
    }
    match from {
        0 => to_state!(S0),
        1 => to_state!(S1),
        2 => to_state!(S2),
        _ => to_state!(S3),
    }
}

// Strategy for generating edges as (from, to, event) indices
fn edges_strategy() -> impl Strategy<Value = Vec<(usize, usize, usize)>> {
    prop::collection::vec((0usize..4, 0usize..4, 0usize..5), 0..24)
}

proptest! {
    #[test]
    fn prop_lookup_returns_first_registered_edge(edges in edges_strategy()) {
        let mut registry = TransitionRegistry::new();
        for &(from, to, on) in &edges {
            connect(&mut registry, from, to, event(on));
        }

        prop_assert_eq!(registry.edges().len(), edges.len());

        for from in 0..4 {
            for on in 0..5 {
                let expected = edges
                    .iter()
                    .find(|&&(f, _, e)| f == from && e == on)
                    .map(|&(_, to, _)| state(to));
                let found = registry
                    .get_edge_or_null(state(from), event(on))
                    .map(|edge| edge.target());
                prop_assert_eq!(found, expected);
            }
        }
    }

    #[test]
    fn prop_every_connected_state_can_start_a_run(edges in edges_strategy()) {
        let mut registry = TransitionRegistry::new();
        for &(from, to, on) in &edges {
            connect(&mut registry, from, to, event(on));
        }

        for index in 0..4 {
            let registered = edges.iter().any(|&(f, t, _)| f == index || t == index);
            prop_assert_eq!(registry.contains(state(index)), registered);
            prop_assert_eq!(registry.starting_feature_for(state(index)).is_ok(), registered);
        }
        prop_assert_eq!(registry.edges().len(), edges.len());
    }

    #[test]
    fn prop_singletons_are_shared_and_factories_are_fresh(
        resolutions in 1usize..16,
        as_singleton in any::<bool>(),
    ) {
        let registry = DependencyRegistry::new();
        if as_singleton {
            registry.register([singleton(|_| String::from("shared"))]);
        } else {
            registry.register([factory(|_| String::from("fresh"))]);
        }

        let resolved: Vec<Arc<String>> = (0..resolutions)
            .map(|_| registry.get::<String>().unwrap())
            .collect();
        let all_shared = resolved.iter().all(|value| Arc::ptr_eq(value, &resolved[0]));

        if as_singleton {
            prop_assert!(all_shared);
        } else {
            prop_assert_eq!(all_shared, resolutions == 1);
        }
    }
}
