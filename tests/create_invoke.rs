mod common;

use std::convert::Infallible;

use agora::{
    distribution::{Binpacking, Colocating, RoundRobin, Single},
    Action, Component, GlobalId, LocalityId, Runtime, RuntimeError,
};
use common::{add, cluster, fail, get_x, register_counter, Counter};

struct Other;

impl Component for Other {
    const COMPONENT_ID: &'static str = "tests::other";
}

fn count_on(ids: &[GlobalId], locality: LocalityId) -> usize {
    ids.iter().filter(|id| id.locality() == locality).count()
}

#[tokio::test]
async fn create_and_invoke_locally() {
    let cluster = cluster(1);
    let runtime = &cluster.runtimes[0];

    let id = runtime
        .create::<Counter, _>(Single::local(), &5)
        .await
        .unwrap();
    assert_eq!(id.locality(), runtime.here());
    assert_eq!(runtime.invoke(id, &add(), 2).await, Ok(7));
    assert_eq!(runtime.invoke(id, &get_x(), ()).await, Ok(7));
    assert_eq!(runtime.instance_count(Counter::component_type()), 1);
    assert_eq!(runtime.pending_invocations(), 0);
}

#[tokio::test]
async fn create_remotely_and_invoke_from_anywhere() {
    let cluster = cluster(3);
    let l2 = cluster.locality(1);

    let id = cluster.runtimes[0]
        .create::<Counter, _>(Single::new(l2), &10)
        .await
        .unwrap();
    assert_eq!(id.locality(), l2);
    assert_eq!(cluster.runtimes[1].instance_count(Counter::component_type()), 1);
    assert_eq!(cluster.runtimes[0].instance_count(Counter::component_type()), 0);

    for runtime in &cluster.runtimes {
        runtime.invoke(id, &add(), 1).await.unwrap();
    }
    assert_eq!(cluster.runtimes[2].invoke(id, &get_x(), ()).await, Ok(13));

    let (locality, _) = cluster.runtimes[0].resolve(id).await.unwrap();
    assert_eq!(locality, l2);
}

#[tokio::test]
async fn concurrent_invocations_all_apply() {
    let cluster = cluster(2);
    let id = cluster.runtimes[0]
        .create::<Counter, _>(Single::new(cluster.locality(1)), &0)
        .await
        .unwrap();

    let add = add();
    let calls = (0..100).map(|_| cluster.runtimes[0].invoke(id, &add, 1).send());
    let results = futures::future::try_join_all(calls).await.unwrap();
    assert_eq!(results.iter().max(), Some(&100));
    assert_eq!(cluster.runtimes[0].invoke(id, &get_x(), ()).await, Ok(100));
}

#[tokio::test]
async fn binpacking_balances_the_cluster() {
    let cluster = cluster(3);
    let localities = cluster.localities();

    let ids = cluster.runtimes[0]
        .create_many::<Counter, _>(Binpacking::new(localities.clone()), 7, &0)
        .await
        .unwrap();
    assert_eq!(ids.len(), 7);
    assert_eq!(count_on(&ids, localities[0]), 3);
    assert_eq!(count_on(&ids, localities[1]), 2);
    assert_eq!(count_on(&ids, localities[2]), 2);
}

#[tokio::test]
async fn binpacking_splits_six_evenly_over_three() {
    let cluster = cluster(3);
    let localities = cluster.localities();

    let ids = cluster.runtimes[0]
        .create_many::<Counter, _>(Binpacking::new(localities.clone()), 6, &0)
        .await
        .unwrap();
    for locality in &localities {
        assert_eq!(count_on(&ids, *locality), 2);
    }
}

#[tokio::test]
async fn created_ids_resolve_everywhere_at_once() {
    let cluster = cluster(3);
    let l2 = cluster.locality(1);
    let id = cluster.runtimes[0]
        .create::<Counter, _>(Single::new(l2), &0)
        .await
        .unwrap();

    for runtime in &cluster.runtimes {
        let (locality, handle) = runtime.resolve(id).await.unwrap();
        assert_eq!(locality, l2);
        assert_eq!(cluster.runtimes[1].address_table().lookup(id), Some(handle));
    }
}

#[tokio::test]
async fn binpacking_accounts_for_existing_instances() {
    let cluster = cluster(3);
    let localities = cluster.localities();
    cluster.runtimes[0]
        .create_many::<Counter, _>(Single::new(localities[0]), 2, &0)
        .await
        .unwrap();

    let ids = cluster.runtimes[1]
        .create_many::<Counter, _>(Binpacking::new(localities.clone()), 4, &0)
        .await
        .unwrap();
    assert_eq!(count_on(&ids, localities[0]), 0);
    assert_eq!(count_on(&ids, localities[1]), 2);
    assert_eq!(count_on(&ids, localities[2]), 2);
}

#[tokio::test]
async fn colocating_follows_the_target() {
    let cluster = cluster(3);
    let l3 = cluster.locality(2);
    let anchor = cluster.runtimes[0]
        .create::<Counter, _>(Single::new(l3), &0)
        .await
        .unwrap();

    let ids = cluster.runtimes[1]
        .create_many::<Counter, _>(Colocating::new(anchor), 3, &0)
        .await
        .unwrap();
    assert_eq!(count_on(&ids, l3), 3);

    cluster.runtimes[0].retire(anchor).await.unwrap();
    assert_eq!(
        cluster.runtimes[1]
            .create::<Counter, _>(Colocating::new(anchor), &0)
            .await,
        Err(RuntimeError::NotFound(anchor))
    );
}

#[tokio::test]
async fn round_robin_cycles_candidates() {
    let cluster = cluster(2);
    let localities = cluster.localities();

    let ids = cluster.runtimes[0]
        .create_many::<Counter, _>(RoundRobin::new(localities.clone()), 5, &0)
        .await
        .unwrap();
    let placed: Vec<_> = ids.iter().map(GlobalId::locality).collect();
    assert_eq!(
        placed,
        [
            localities[0],
            localities[1],
            localities[0],
            localities[1],
            localities[0]
        ]
    );

    assert_eq!(
        cluster.runtimes[0]
            .create::<Counter, _>(RoundRobin::new([]), &0)
            .await,
        Err(RuntimeError::NoCandidates)
    );
}

#[tokio::test]
async fn create_many_of_zero_creates_nothing() {
    let cluster = cluster(1);
    let ids = cluster.runtimes[0]
        .create_many::<Counter, _>(Single::local(), 0, &0)
        .await
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn factory_errors_surface_as_construction_failures() {
    let cluster = cluster(2);
    let result = cluster.runtimes[0]
        .create::<Counter, _>(Single::new(cluster.locality(1)), &-1)
        .await;
    assert_eq!(
        result,
        Err(RuntimeError::ConstructionFailed(
            "counter cannot start negative".to_string()
        ))
    );
}

#[tokio::test]
async fn undecodable_constructor_arguments_fail_construction() {
    let cluster = cluster(2);
    let result = cluster.runtimes[0]
        .create::<Counter, _>(Single::new(cluster.locality(1)), &"not an int")
        .await;
    assert!(
        matches!(result, Err(RuntimeError::ConstructionFailed(_))),
        "unexpected result {result:?}"
    );
    assert_eq!(cluster.runtimes[1].instance_count(Counter::component_type()), 0);
}

#[tokio::test]
async fn undecodable_action_arguments_fail_the_action() {
    let cluster = cluster(2);
    let id = cluster.runtimes[0]
        .create::<Counter, _>(Single::new(cluster.locality(1)), &0)
        .await
        .unwrap();

    // Same action id as `add`, but called with a string argument.
    let mistyped: Action<Counter, String, i64> = Action::new("add");
    let result = cluster.runtimes[0]
        .invoke(id, &mistyped, "1".to_string())
        .await;
    assert!(
        matches!(result, Err(RuntimeError::ActionFailed(_))),
        "unexpected result {result:?}"
    );
    assert_eq!(cluster.runtimes[0].invoke(id, &get_x(), ()).await, Ok(0));
}

#[tokio::test]
async fn failed_bulk_creation_rolls_back() {
    let cluster = cluster(2);
    // A third locality which never registered the component type.
    let bare = Runtime::new(cluster.network.endpoint(LocalityId::new(3)));
    let mut localities = cluster.localities();
    localities.push(bare.here());

    let result = cluster.runtimes[0]
        .create_many::<Counter, _>(RoundRobin::new(localities), 6, &0)
        .await;
    assert_eq!(
        result,
        Err(RuntimeError::UnknownType(Counter::component_type()))
    );
    for runtime in &cluster.runtimes {
        assert_eq!(runtime.instance_count(Counter::component_type()), 0);
    }
}

#[tokio::test]
async fn action_errors() {
    let cluster = cluster(2);
    let l2 = cluster.locality(1);
    let runtime = &cluster.runtimes[0];
    let id = runtime
        .create::<Counter, _>(Single::new(l2), &0)
        .await
        .unwrap();

    assert_eq!(
        runtime.invoke(id, &fail(), "boom".to_string()).await,
        Err(RuntimeError::ActionFailed("boom".to_string()))
    );

    let missing: Action<Counter, (), ()> = Action::new("missing");
    assert_eq!(
        runtime.invoke(id, &missing, ()).await,
        Err(RuntimeError::UnknownAction(missing.id()))
    );
}

#[tokio::test]
async fn actions_check_the_component_type() {
    let cluster = cluster(2);
    let ping: Action<Other, (), ()> = Action::new("ping");
    for runtime in &cluster.runtimes {
        runtime
            .register_component(|(): ()| Ok::<_, Infallible>(Other))
            .unwrap();
        runtime
            .register_action(&ping, |_: &Other, ()| Ok::<_, Infallible>(()))
            .unwrap();
    }

    let other = cluster.runtimes[0]
        .create::<Other, _>(Single::new(cluster.locality(1)), &())
        .await
        .unwrap();
    assert_eq!(
        cluster.runtimes[0].invoke(other, &get_x(), ()).await,
        Err(RuntimeError::BadComponentType {
            expected: Counter::component_type(),
            found: Other::component_type(),
        })
    );
    assert_eq!(cluster.runtimes[0].invoke(other, &ping, ()).await, Ok(()));
}

#[tokio::test]
async fn retired_instances_are_unknown() {
    let cluster = cluster(2);
    let l2 = cluster.locality(1);
    let id = cluster.runtimes[0]
        .create::<Counter, _>(Single::new(l2), &0)
        .await
        .unwrap();

    cluster.runtimes[0].retire(id).await.unwrap();
    assert_eq!(cluster.runtimes[1].instance_count(Counter::component_type()), 0);
    for runtime in &cluster.runtimes {
        assert_eq!(
            runtime.invoke(id, &get_x(), ()).await,
            Err(RuntimeError::UnknownId(id))
        );
    }

    // Retiring twice is a no-op.
    cluster.runtimes[1].retire(id).await.unwrap();
}

#[tokio::test]
async fn unknown_ids() {
    let cluster = cluster(2);
    let local = GlobalId::new(cluster.locality(0), 999);
    let foreign = GlobalId::new(cluster.locality(1), 999);

    assert_eq!(
        cluster.runtimes[0].invoke(local, &get_x(), ()).await,
        Err(RuntimeError::UnknownId(local))
    );
    assert_eq!(
        cluster.runtimes[0].invoke(foreign, &get_x(), ()).await,
        Err(RuntimeError::UnknownId(foreign))
    );
    assert_eq!(
        cluster.runtimes[0].resolve(foreign).await,
        Err(RuntimeError::UnknownId(foreign))
    );
}

#[tokio::test]
async fn unreachable_localities_fail_with_transport_errors() {
    let cluster = cluster(1);
    let stranded = GlobalId::new(LocalityId::new(9), 1);

    let result = cluster.runtimes[0].invoke(stranded, &get_x(), ()).await;
    assert!(
        matches!(result, Err(RuntimeError::Transport(_))),
        "unexpected result {result:?}"
    );
    assert_eq!(cluster.runtimes[0].pending_invocations(), 0);
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let cluster = cluster(1);
    let runtime = &cluster.runtimes[0];
    assert!(runtime
        .register_component(|x: i64| Ok::<_, Infallible>(Counter { x: x.into() }))
        .is_err());
    assert!(runtime
        .register_action(&get_x(), |_: &Counter, ()| Ok::<_, Infallible>(0))
        .is_err());

    // Registering is per locality.
    let fresh = Runtime::new(cluster.network.endpoint(LocalityId::new(2)));
    register_counter(&fresh);
    assert!(fresh
        .components()
        .contains(Counter::component_type()));
}
