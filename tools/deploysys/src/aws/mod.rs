use aws_config::BehaviorVersion;
use aws_types::region::Region;
use aws_types::SdkConfig;
use log::debug;

pub(crate) mod ecs;

/// Loads SDK configuration for `region`, using the named profile's credentials if one is given
/// and the default credentials chain otherwise.
pub(crate) async fn sdk_config(region: &str, profile: Option<&str>) -> SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_owned()));
    if let Some(profile) = profile {
        debug!("Using AWS profile '{}'", profile);
        loader = loader.profile_name(profile);
    }
    loader.load().await
}
