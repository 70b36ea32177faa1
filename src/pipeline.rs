use crate::blueprint::{Step, parallel, series};
use crate::config::Config;
use crate::tasks::{Clean, Fonts, Images, Markup, Resources, Scripts, Sprites, Styles};

/// The default pipeline.
///
/// The output directory is wiped first, then every independent asset kind is
/// processed in parallel and styles are compiled last. Production and
/// development builds share this graph, the difference lies in the
/// [`crate::Environment`] it is run with.
pub fn standard(config: &Config) -> Step {
    series([
        Step::task(Clean::new(config)),
        parallel([
            Step::task(Markup::new(config)),
            Step::task(Scripts::new(config)),
            Step::task(Fonts::new(config)),
            Step::task(Images::new(config)),
            Step::task(Sprites::new(config)),
            Step::task(Resources::new(config)),
        ]),
        Step::task(Styles::new(config)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pipeline;

    #[test]
    fn test_standard_pipeline_is_valid() {
        let pipeline = Pipeline::new(standard(&Config::default())).unwrap();

        let mut names: Vec<_> = pipeline.tasks().map(|task| task.name()).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["clean", "fonts", "html", "images", "resources", "scripts", "sprites", "styles"]
        );

        // clean fans out to the six asset tasks, which all feed styles
        assert_eq!(pipeline.graph.edge_count(), 12);
    }

    #[test]
    fn test_every_asset_task_is_watched() {
        let pipeline = Pipeline::new(standard(&Config::default())).unwrap();
        let bindings = pipeline.bindings();

        for task in ["styles", "html", "scripts", "images", "sprites", "fonts", "resources"] {
            assert!(bindings.iter().any(|b| b.task == task), "{task} not watched");
        }
        assert!(!bindings.iter().any(|b| b.task == "clean"));
    }
}
