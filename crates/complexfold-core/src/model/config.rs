use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for {parameter}: {reason}")]
    Invalid {
        parameter: &'static str,
        reason: String,
    },
}

fn require_positive(parameter: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            parameter,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// Number of torsion angles the frame expansion consumes per residue.
pub const NUM_TORSION_ANGLES: usize = 7;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StructureModuleConfig {
    /// Single representation channels.
    pub c_s: usize,
    /// Pair representation channels.
    pub c_z: usize,
    /// Hidden channels per point-attention head.
    pub c_ipa: usize,
    /// Hidden channels of the angle resnet.
    pub c_resnet: usize,
    pub no_heads_ipa: usize,
    pub no_qk_points: usize,
    pub no_v_points: usize,
    pub dropout_rate: f64,
    pub no_blocks: usize,
    pub no_transition_layers: usize,
    pub no_resnet_blocks: usize,
    pub no_angles: usize,
    /// Multiplies backbone translations, undoing the coordinate scaling used in training.
    pub trans_scale_factor: f64,
    pub epsilon: f64,
    /// Magnitude of the additive attention mask.
    pub inf: f64,
}

impl Default for StructureModuleConfig {
    fn default() -> Self {
        Self {
            c_s: 384,
            c_z: 128,
            c_ipa: 16,
            c_resnet: 128,
            no_heads_ipa: 12,
            no_qk_points: 4,
            no_v_points: 8,
            dropout_rate: 0.1,
            no_blocks: 8,
            no_transition_layers: 1,
            no_resnet_blocks: 2,
            no_angles: NUM_TORSION_ANGLES,
            trans_scale_factor: 10.0,
            epsilon: 1e-8,
            inf: 1e5,
        }
    }
}

impl StructureModuleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("c_s", self.c_s)?;
        require_positive("c_z", self.c_z)?;
        require_positive("c_ipa", self.c_ipa)?;
        require_positive("c_resnet", self.c_resnet)?;
        require_positive("no_heads_ipa", self.no_heads_ipa)?;
        require_positive("no_qk_points", self.no_qk_points)?;
        require_positive("no_v_points", self.no_v_points)?;
        require_positive("no_blocks", self.no_blocks)?;
        if self.no_angles != NUM_TORSION_ANGLES {
            return Err(ConfigError::Invalid {
                parameter: "no_angles",
                reason: format!(
                    "frame expansion consumes exactly {NUM_TORSION_ANGLES} torsion angles, got {}",
                    self.no_angles
                ),
            });
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(ConfigError::Invalid {
                parameter: "dropout_rate",
                reason: format!("must lie in [0, 1), got {}", self.dropout_rate),
            });
        }
        if self.epsilon < 0.0 || self.inf <= 0.0 {
            return Err(ConfigError::Invalid {
                parameter: if self.epsilon < 0.0 { "epsilon" } else { "inf" },
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`StructureModuleConfig`].
///
/// Channel widths, head and point counts and the block count are required; the remaining
/// hyper-parameters fall back to [`StructureModuleConfig::default`].
#[derive(Default)]
pub struct StructureModuleConfigBuilder {
    c_s: Option<usize>,
    c_z: Option<usize>,
    c_ipa: Option<usize>,
    c_resnet: Option<usize>,
    no_heads_ipa: Option<usize>,
    no_qk_points: Option<usize>,
    no_v_points: Option<usize>,
    dropout_rate: Option<f64>,
    no_blocks: Option<usize>,
    no_transition_layers: Option<usize>,
    no_resnet_blocks: Option<usize>,
    no_angles: Option<usize>,
    trans_scale_factor: Option<f64>,
    epsilon: Option<f64>,
    inf: Option<f64>,
}

impl StructureModuleConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn c_s(mut self, channels: usize) -> Self {
        self.c_s = Some(channels);
        self
    }
    pub fn c_z(mut self, channels: usize) -> Self {
        self.c_z = Some(channels);
        self
    }
    pub fn c_ipa(mut self, channels: usize) -> Self {
        self.c_ipa = Some(channels);
        self
    }
    pub fn c_resnet(mut self, channels: usize) -> Self {
        self.c_resnet = Some(channels);
        self
    }
    pub fn no_heads_ipa(mut self, heads: usize) -> Self {
        self.no_heads_ipa = Some(heads);
        self
    }
    pub fn no_qk_points(mut self, points: usize) -> Self {
        self.no_qk_points = Some(points);
        self
    }
    pub fn no_v_points(mut self, points: usize) -> Self {
        self.no_v_points = Some(points);
        self
    }
    pub fn dropout_rate(mut self, rate: f64) -> Self {
        self.dropout_rate = Some(rate);
        self
    }
    pub fn no_blocks(mut self, blocks: usize) -> Self {
        self.no_blocks = Some(blocks);
        self
    }
    pub fn no_transition_layers(mut self, layers: usize) -> Self {
        self.no_transition_layers = Some(layers);
        self
    }
    pub fn no_resnet_blocks(mut self, blocks: usize) -> Self {
        self.no_resnet_blocks = Some(blocks);
        self
    }
    pub fn no_angles(mut self, angles: usize) -> Self {
        self.no_angles = Some(angles);
        self
    }
    pub fn trans_scale_factor(mut self, factor: f64) -> Self {
        self.trans_scale_factor = Some(factor);
        self
    }
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }
    pub fn inf(mut self, inf: f64) -> Self {
        self.inf = Some(inf);
        self
    }

    pub fn build(self) -> Result<StructureModuleConfig, ConfigError> {
        let defaults = StructureModuleConfig::default();
        let config = StructureModuleConfig {
            c_s: self.c_s.ok_or(ConfigError::MissingParameter("c_s"))?,
            c_z: self.c_z.ok_or(ConfigError::MissingParameter("c_z"))?,
            c_ipa: self.c_ipa.ok_or(ConfigError::MissingParameter("c_ipa"))?,
            c_resnet: self
                .c_resnet
                .ok_or(ConfigError::MissingParameter("c_resnet"))?,
            no_heads_ipa: self
                .no_heads_ipa
                .ok_or(ConfigError::MissingParameter("no_heads_ipa"))?,
            no_qk_points: self
                .no_qk_points
                .ok_or(ConfigError::MissingParameter("no_qk_points"))?,
            no_v_points: self
                .no_v_points
                .ok_or(ConfigError::MissingParameter("no_v_points"))?,
            no_blocks: self
                .no_blocks
                .ok_or(ConfigError::MissingParameter("no_blocks"))?,
            dropout_rate: self.dropout_rate.unwrap_or(defaults.dropout_rate),
            no_transition_layers: self
                .no_transition_layers
                .unwrap_or(defaults.no_transition_layers),
            no_resnet_blocks: self.no_resnet_blocks.unwrap_or(defaults.no_resnet_blocks),
            no_angles: self.no_angles.unwrap_or(defaults.no_angles),
            trans_scale_factor: self
                .trans_scale_factor
                .unwrap_or(defaults.trans_scale_factor),
            epsilon: self.epsilon.unwrap_or(defaults.epsilon),
            inf: self.inf.unwrap_or(defaults.inf),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OuterProductMeanConfig {
    /// MSA channels.
    pub c_m: usize,
    /// Pair channels.
    pub c_z: usize,
    pub c_hidden: usize,
    pub eps: f64,
    /// Project `a` and `b` with one `c_m -> 2 * c_hidden` layer instead of two.
    pub fused_projection: bool,
}

impl Default for OuterProductMeanConfig {
    fn default() -> Self {
        Self {
            c_m: 256,
            c_z: 128,
            c_hidden: 32,
            eps: 1e-3,
            fused_projection: false,
        }
    }
}

impl OuterProductMeanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("c_m", self.c_m)?;
        require_positive("c_z", self.c_z)?;
        require_positive("c_hidden", self.c_hidden)?;
        if self.eps < 0.0 {
            return Err(ConfigError::Invalid {
                parameter: "eps",
                reason: format!("must not be negative, got {}", self.eps),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct OuterProductMeanConfigBuilder {
    c_m: Option<usize>,
    c_z: Option<usize>,
    c_hidden: Option<usize>,
    eps: Option<f64>,
    fused_projection: Option<bool>,
}

impl OuterProductMeanConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn c_m(mut self, channels: usize) -> Self {
        self.c_m = Some(channels);
        self
    }
    pub fn c_z(mut self, channels: usize) -> Self {
        self.c_z = Some(channels);
        self
    }
    pub fn c_hidden(mut self, channels: usize) -> Self {
        self.c_hidden = Some(channels);
        self
    }
    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = Some(eps);
        self
    }
    pub fn fused_projection(mut self, fused: bool) -> Self {
        self.fused_projection = Some(fused);
        self
    }

    pub fn build(self) -> Result<OuterProductMeanConfig, ConfigError> {
        let config = OuterProductMeanConfig {
            c_m: self.c_m.ok_or(ConfigError::MissingParameter("c_m"))?,
            c_z: self.c_z.ok_or(ConfigError::MissingParameter("c_z"))?,
            c_hidden: self
                .c_hidden
                .ok_or(ConfigError::MissingParameter("c_hidden"))?,
            eps: self.eps.unwrap_or(1e-3),
            fused_projection: self.fused_projection.unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_builder() -> StructureModuleConfigBuilder {
        StructureModuleConfigBuilder::new()
            .c_s(8)
            .c_z(4)
            .c_ipa(4)
            .c_resnet(4)
            .no_heads_ipa(2)
            .no_qk_points(2)
            .no_v_points(2)
            .no_blocks(2)
    }

    #[test]
    fn builder_fills_optional_parameters_from_defaults() {
        let config = small_builder().build().unwrap();
        assert_eq!(config.c_s, 8);
        assert_eq!(config.no_angles, NUM_TORSION_ANGLES);
        assert_eq!(config.trans_scale_factor, 10.0);
        assert_eq!(config.inf, 1e5);
    }

    #[test]
    fn builder_reports_missing_parameter() {
        let result = StructureModuleConfigBuilder::new().c_s(8).build();
        assert_eq!(result, Err(ConfigError::MissingParameter("c_z")));
    }

    #[test]
    fn builder_rejects_unsupported_angle_count() {
        let result = small_builder().no_angles(5).build();
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                parameter: "no_angles",
                ..
            })
        ));
    }

    #[test]
    fn builder_rejects_out_of_range_dropout() {
        let result = small_builder().dropout_rate(1.0).build();
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                parameter: "dropout_rate",
                ..
            })
        ));
    }

    #[test]
    fn structure_config_deserializes_from_toml() {
        let config: StructureModuleConfig = toml::from_str(
            r#"
            c_s = 32
            c_z = 16
            no_blocks = 3
            trans_scale_factor = 20.0
            "#,
        )
        .unwrap();
        assert_eq!(config.c_s, 32);
        assert_eq!(config.no_blocks, 3);
        assert_eq!(config.trans_scale_factor, 20.0);
        assert_eq!(config.c_ipa, StructureModuleConfig::default().c_ipa);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn structure_config_rejects_unknown_fields() {
        let result = toml::from_str::<StructureModuleConfig>("c_sz = 3");
        assert!(result.is_err());
    }

    #[test]
    fn outer_product_mean_builder_requires_widths() {
        assert_eq!(
            OuterProductMeanConfigBuilder::new().c_m(4).c_z(4).build(),
            Err(ConfigError::MissingParameter("c_hidden"))
        );
        let config = OuterProductMeanConfigBuilder::new()
            .c_m(4)
            .c_z(4)
            .c_hidden(2)
            .fused_projection(true)
            .build()
            .unwrap();
        assert_eq!(config.eps, 1e-3);
        assert!(config.fused_projection);
    }
}
