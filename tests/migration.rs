mod common;

use std::convert::Infallible;

use agora::{distribution::Single, Component, RuntimeError};
use common::{add, cluster, get_x, Counter};

struct Pinned;

impl Component for Pinned {
    const COMPONENT_ID: &'static str = "tests::pinned";
}

#[tokio::test]
async fn migration_keeps_id_and_state() {
    let cluster = cluster(3);
    let (l1, l2) = (cluster.locality(0), cluster.locality(1));
    let id = cluster.runtimes[0]
        .create::<Counter, _>(Single::local(), &0)
        .await
        .unwrap();
    cluster.runtimes[0].invoke(id, &add(), 42).await.unwrap();

    cluster.runtimes[0].migrate(id, l2).await.unwrap();
    assert_eq!(cluster.runtimes[0].instance_count(Counter::component_type()), 0);
    assert_eq!(cluster.runtimes[1].instance_count(Counter::component_type()), 1);

    for runtime in &cluster.runtimes {
        assert_eq!(runtime.invoke(id, &get_x(), ()).await, Ok(42));
        assert_eq!(runtime.resolve(id).await.map(|(locality, _)| locality), Ok(l2));
    }
    assert_eq!(id.locality(), l1);
}

#[tokio::test]
async fn migration_away_from_a_foreign_host_updates_home() {
    let cluster = cluster(3);
    let (l1, l2, l3) = (cluster.locality(0), cluster.locality(1), cluster.locality(2));
    let id = cluster.runtimes[0]
        .create::<Counter, _>(Single::local(), &1)
        .await
        .unwrap();

    cluster.runtimes[0].migrate(id, l2).await.unwrap();
    // Issued from a locality which neither homes nor hosts the instance.
    cluster.runtimes[2].migrate(id, l3).await.unwrap();
    assert_eq!(cluster.runtimes[1].instance_count(Counter::component_type()), 0);
    assert_eq!(cluster.runtimes[2].instance_count(Counter::component_type()), 1);

    for runtime in &cluster.runtimes {
        runtime.invoke(id, &add(), 1).await.unwrap();
    }
    assert_eq!(cluster.runtimes[0].invoke(id, &get_x(), ()).await, Ok(4));
    assert_eq!(
        cluster.runtimes[0].resolve(id).await.map(|(locality, _)| locality),
        Ok(l3)
    );

    // And back home.
    cluster.runtimes[1].migrate(id, l1).await.unwrap();
    assert_eq!(cluster.runtimes[0].instance_count(Counter::component_type()), 1);
    assert_eq!(cluster.runtimes[2].instance_count(Counter::component_type()), 0);
    for runtime in &cluster.runtimes {
        assert_eq!(runtime.invoke(id, &get_x(), ()).await, Ok(4));
    }
}

#[tokio::test]
async fn migrating_to_the_current_host_is_a_no_op() {
    let cluster = cluster(2);
    let l2 = cluster.locality(1);
    let id = cluster.runtimes[0]
        .create::<Counter, _>(Single::new(l2), &9)
        .await
        .unwrap();

    cluster.runtimes[0].migrate(id, l2).await.unwrap();
    assert_eq!(cluster.runtimes[1].instance_count(Counter::component_type()), 1);
    assert_eq!(cluster.runtimes[0].invoke(id, &get_x(), ()).await, Ok(9));
}

#[tokio::test]
async fn unregistered_types_cannot_migrate() {
    let cluster = cluster(2);
    for runtime in &cluster.runtimes {
        runtime
            .register_component(|(): ()| Ok::<_, Infallible>(Pinned))
            .unwrap();
    }
    let id = cluster.runtimes[0]
        .create::<Pinned, _>(Single::local(), &())
        .await
        .unwrap();

    assert_eq!(
        cluster.runtimes[0].migrate(id, cluster.locality(1)).await,
        Err(RuntimeError::NotMigratable(Pinned::component_type()))
    );
    assert_eq!(cluster.runtimes[0].instance_count(Pinned::component_type()), 1);
}

#[tokio::test]
async fn retiring_a_migrated_instance_clears_forwarding() {
    let cluster = cluster(3);
    let l2 = cluster.locality(1);
    let id = cluster.runtimes[0]
        .create::<Counter, _>(Single::local(), &0)
        .await
        .unwrap();
    cluster.runtimes[0].migrate(id, l2).await.unwrap();

    cluster.runtimes[2].retire(id).await.unwrap();
    assert_eq!(cluster.runtimes[1].instance_count(Counter::component_type()), 0);
    assert_eq!(cluster.runtimes[0].address_table().lookup(id), None);
    for runtime in &cluster.runtimes {
        assert_eq!(
            runtime.invoke(id, &get_x(), ()).await,
            Err(RuntimeError::UnknownId(id))
        );
    }
}
