//! Counting properties of pacts and groups over random finish schedules.
mod common;

use common::{finishes_after, Counter};
use pact::{PactGroup, Pollable};
use proptest::prelude::*;

fn arb_strategy() -> impl Strategy<Value = pact::Strategy> {
    prop_oneof![Just(pact::Strategy::Lazy), Just(pact::Strategy::Eager)]
}

proptest! {
    #[test]
    fn pact_callbacks_match_poll_count(finish_at in 1usize..20, extra in 0usize..10) {
        let (pact, evaluations) = finishes_after("job", finish_at);
        let during = Counter::default();
        let then = Counter::default();
        pact.during(during.hook()).then(then.hook());

        for _ in 0..finish_at + extra {
            pact.poll().unwrap();
        }
        prop_assert!(pact.is_finished());
        prop_assert_eq!(evaluations.get(), finish_at);
        prop_assert_eq!(during.get(), finish_at - 1);
        prop_assert_eq!(then.get(), 1);
    }

    #[test]
    fn lazy_group_never_polls_ahead(schedule in prop::collection::vec(1usize..6, 1..6)) {
        let members: Vec<_> = schedule
            .iter()
            .enumerate()
            .map(|(index, polls)| finishes_after(&format!("m{index}"), *polls))
            .collect();
        let group: PactGroup = members.iter().map(|(pact, _)| pact.clone()).collect();

        let mut calls = 0;
        while !group.poll().unwrap() {
            calls += 1;
            // at most one member is in flight, everything before it is done
            let started = members.iter().filter(|(_, evaluations)| evaluations.get() > 0);
            let in_flight = started.filter(|(pact, _)| !pact.is_finished()).count();
            prop_assert!(in_flight <= 1);
        }
        prop_assert_eq!(calls + 1, schedule.iter().sum::<usize>());
        for ((_, evaluations), polls) in members.iter().zip(&schedule) {
            prop_assert_eq!(evaluations.get(), *polls);
        }
    }

    #[test]
    fn eager_group_finishes_with_slowest(schedule in prop::collection::vec(1usize..6, 1..6)) {
        let members: Vec<_> = schedule
            .iter()
            .enumerate()
            .map(|(index, polls)| finishes_after(&format!("m{index}"), *polls))
            .collect();
        let group = PactGroup::with_strategy(pact::Strategy::Eager);
        for (pact, _) in &members {
            group.add(pact.clone(), false);
        }

        let mut calls = 1;
        while !group.poll().unwrap() {
            calls += 1;
        }
        prop_assert_eq!(calls, *schedule.iter().max().unwrap());
    }

    #[test]
    fn absorbed_then_fires_once_with_group(
        strategy in arb_strategy(),
        schedule in prop::collection::vec((1usize..5, any::<bool>()), 1..5),
    ) {
        let group = PactGroup::with_strategy(strategy);
        let own = Counter::default();
        let absorbed = Counter::default();
        for (index, (polls, absorb)) in schedule.iter().enumerate() {
            let (pact, _) = finishes_after(&format!("m{index}"), *polls);
            pact.then(if *absorb { absorbed.hook() } else { own.hook() });
            group.add(pact, *absorb);
        }
        let absorbing = schedule.iter().filter(|(_, absorb)| *absorb).count();

        while !group.poll().unwrap() {
            prop_assert_eq!(absorbed.get(), 0);
        }
        prop_assert_eq!(absorbed.get(), absorbing);
        prop_assert_eq!(own.get(), schedule.len() - absorbing);
        group.poll().unwrap();
        prop_assert_eq!(absorbed.get() + own.get(), schedule.len());
    }
}
