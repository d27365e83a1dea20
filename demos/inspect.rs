use dataset_collection::{Dataset, DatasetConfig, DescriptionMap, ExampleSet, Mnist, TinyImageNet};
use std::fmt::Debug;

fn summary<S, L: Debug>(name: &str, split: &ExampleSet<S, L>) {
    println!("--{name}--");
    println!("Count: {}", split.len());
    if let Some((_, label)) = split.get(0) {
        println!("First label: {label:?}");
    }
}

fn print_descriptions(map: &DescriptionMap) {
    println!("--labels--");
    for (label, description) in map.iter().take(10) {
        println!("{label}: {}", description.as_deref().unwrap_or("<missing>"));
    }
    if map.len() > 10 {
        println!("... {} labels", map.len());
    }
}

fn inspect<D: Dataset>(dataset: &D) -> dataset_collection::Result<()>
where
    D::Label: Debug,
{
    print_descriptions(&dataset.description_map()?);
    summary("train", &dataset.train_dataset()?);
    summary("val", &dataset.val_dataset()?);
    Ok(())
}

fn main() -> dataset_collection::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let id = std::env::args()
        .nth(1)
        .expect("Give a dataset name, choose from `mnist` or `tiny-imagenet`");
    let config = DatasetConfig::from_env();
    match id.as_str() {
        "mnist" => inspect(&Mnist::with_config(&config)?),
        "tiny-imagenet" => inspect(&TinyImageNet::with_config(&config)?),
        other => {
            eprintln!("Unknown dataset {other}, choose from `mnist` or `tiny-imagenet`");
            std::process::exit(2)
        }
    }
}
