use std::{num::NonZeroUsize, sync::Arc};

use machine_learning::{
    arch::{
        Network, Sequential,
        activations::ActFn,
        layers::Layer,
        loss::{CrossEntropy, LossFn},
    },
    dataset::{DataLoader, Dataset, DistributedSampler},
    eval::{Evaluator, MeanIou},
    optimization::{LrScheduler, Optimizer, ScheduleParams, Sgd, WarmupPolyLr},
};
use rand::{SeedableRng, rngs::StdRng};

/// Two clusters, class 0 around (-1, -1) and class 1 around (1, 1).
fn clusters() -> Dataset {
    let mut x = Vec::new();
    let mut y = Vec::new();

    for i in 0..32 {
        let jitter = (i % 4) as f32 * 0.1;
        let (sign, class) = if i % 2 == 0 { (-1.0, 0.0) } else { (1.0, 1.0) };
        x.extend([sign + jitter, sign - jitter]);
        y.push(class);
    }

    Dataset::new(x, 2, y, 1).unwrap()
}

#[test]
fn sgd_with_a_schedule_separates_two_clusters() {
    let dataset = Arc::new(clusters());
    let sampler = DistributedSampler::new(dataset.len(), 0, 1, 0).unwrap();
    let mut loader = DataLoader::new(
        Arc::clone(&dataset),
        sampler,
        NonZeroUsize::new(8).unwrap(),
        NonZeroUsize::new(2).unwrap(),
    )
    .unwrap();

    let model = Sequential::new([
        Layer::dense((2, 4), Some(ActFn::relu())),
        Layer::dense((4, 2), None),
    ]);
    let mut net = Network::init(model, &mut StdRng::seed_from_u64(0)).unwrap();

    let schedule = WarmupPolyLr::new(ScheduleParams {
        base_lr: 0.1,
        momentum: 0.9,
        weight_decay: 0.0,
        warmup_steps: 4,
        warmup_start_lr: 0.01,
        max_steps: 80,
        power: 0.9,
    })
    .unwrap();
    let mut sgd = Sgd::new(net.size(), 0.0, 0.9, 0.0);
    let loss_fn = CrossEntropy::new(255);

    let mut losses = Vec::new();
    let mut step = 0;

    for epoch in 0..20 {
        loader.set_epoch(epoch);

        for batch in loader.iter() {
            net.zero_grad();
            let y_pred = net.forward(batch.x.view()).unwrap();
            losses.push(loss_fn.loss(y_pred.view(), batch.y.view()).unwrap());
            let d = loss_fn.loss_prime(y_pred.view(), batch.y.view()).unwrap();
            net.backward(d).unwrap();

            sgd.set_learning_rate(schedule.lr(step) as f32);
            let (params, grad) = net.params_and_grad();
            sgd.update_params(grad, params).unwrap();
            step += 1;
        }
    }

    assert_eq!(step, 80);
    assert!(losses.last().unwrap() < &losses[0]);

    net.eval();
    let miou = MeanIou::new(dataset, 2, 8, 255).evaluate(&mut net).unwrap();
    assert!(miou > 0.9, "miou = {miou}");
}
