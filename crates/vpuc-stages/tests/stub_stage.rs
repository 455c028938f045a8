mod common;

use common::single_stage;
use vpuc_core::{
    BatchSupport, BlobSerializer, DataDesc, DataType, DataUsage, DimsOrder, Model, StageCtx,
    StageCtxMut, StageDataInfo, StageId, StageType, StridesRequirement,
};
use vpuc_stages::capabilities;

/// Capabilities a stub must never be asked for.
#[derive(Debug, Clone, Copy)]
enum Lowering {
    DataOrder,
    Strides,
    Finalize,
    FinalCheck,
    Params,
    Data,
}

fn invoke(stage_type: StageType, capability: Lowering) {
    let (mut model, id) = single_stage(stage_type);
    let ops = capabilities(stage_type);
    let mut serializer = BlobSerializer::new();
    let _ = match capability {
        Lowering::DataOrder => {
            let mut info = StageDataInfo::<DimsOrder>::new();
            ops.propagate_data_order(&StageCtx::new(&model, id).unwrap(), &mut info)
        }
        Lowering::Strides => {
            let mut info = StageDataInfo::<StridesRequirement>::new();
            ops.get_data_strides_requirements(&StageCtx::new(&model, id).unwrap(), &mut info)
        }
        Lowering::Finalize => {
            ops.finalize_data_layout(&mut StageCtxMut::new(&mut model, id).unwrap())
        }
        Lowering::FinalCheck => ops.final_check(&StageCtx::new(&model, id).unwrap()),
        Lowering::Params => {
            ops.serialize_params(&StageCtx::new(&model, id).unwrap(), &mut serializer)
        }
        Lowering::Data => ops.serialize_data(&StageCtx::new(&model, id).unwrap(), &mut serializer),
    };
}

macro_rules! must_be_replaced {
    ($($name:ident: $stage_type:ident, $capability:ident;)*) => {
        $(
            #[test]
            #[should_panic(expected = "must be replaced with a real stage")]
            fn $name() {
                invoke(StageType::$stage_type, Lowering::$capability);
            }
        )*
    };
}

must_be_replaced! {
    conv_data_order: StubConv, DataOrder;
    conv_strides: StubConv, Strides;
    conv_finalize: StubConv, Finalize;
    conv_final_check: StubConv, FinalCheck;
    conv_params: StubConv, Params;
    conv_data: StubConv, Data;

    fc_data_order: StubFullyConnected, DataOrder;
    fc_strides: StubFullyConnected, Strides;
    fc_finalize: StubFullyConnected, Finalize;
    fc_final_check: StubFullyConnected, FinalCheck;
    fc_params: StubFullyConnected, Params;
    fc_data: StubFullyConnected, Data;

    deconv_data_order: StubDeconv, DataOrder;
    deconv_strides: StubDeconv, Strides;
    deconv_finalize: StubDeconv, Finalize;
    deconv_final_check: StubDeconv, FinalCheck;
    deconv_params: StubDeconv, Params;
    deconv_data: StubDeconv, Data;

    max_pool_data_order: StubMaxPool, DataOrder;
    max_pool_strides: StubMaxPool, Strides;
    max_pool_finalize: StubMaxPool, Finalize;
    max_pool_final_check: StubMaxPool, FinalCheck;
    max_pool_params: StubMaxPool, Params;
    max_pool_data: StubMaxPool, Data;

    avg_pool_data_order: StubAvgPool, DataOrder;
    avg_pool_strides: StubAvgPool, Strides;
    avg_pool_finalize: StubAvgPool, Finalize;
    avg_pool_final_check: StubAvgPool, FinalCheck;
    avg_pool_params: StubAvgPool, Params;
    avg_pool_data: StubAvgPool, Data;
}

#[test]
fn test_weightable_stubs_split_batch() {
    for stage_type in [
        StageType::StubConv,
        StageType::StubFullyConnected,
        StageType::StubDeconv,
    ] {
        let (model, id) = single_stage(stage_type);
        let ctx = StageCtx::new(&model, id).unwrap();
        let mut info = StageDataInfo::new();
        capabilities(stage_type)
            .get_batch_support_info(&ctx, &mut info)
            .unwrap();

        assert_eq!(info.input(ctx.input_edge(0).unwrap()), Some(&BatchSupport::Split));
        assert_eq!(info.output(ctx.output_edge(0).unwrap()), Some(&BatchSupport::Split));
    }
}

#[test]
fn test_pooling_stubs_mark_nothing() {
    for stage_type in [StageType::StubMaxPool, StageType::StubAvgPool] {
        let (model, id) = single_stage(stage_type);
        let ctx = StageCtx::new(&model, id).unwrap();
        let mut info = StageDataInfo::new();
        capabilities(stage_type)
            .get_batch_support_info(&ctx, &mut info)
            .unwrap();
        assert!(info.is_empty());
    }
}

#[test]
fn test_stub_initial_check_accepts_f16() {
    for stage_type in StageType::STUBS {
        let (model, id) = single_stage(stage_type);
        let ctx = StageCtx::new(&model, id).unwrap();
        capabilities(stage_type).initial_check(&ctx).unwrap();
    }
}

#[test]
fn test_clone_is_deep_and_edgeless() {
    let (mut model, id) = single_stage(StageType::StubConv);
    model
        .stage_mut(id)
        .unwrap()
        .attrs_mut()
        .set(vpuc_core::AttrKey::TryHw, true)
        .unwrap();

    let template = capabilities(StageType::StubConv).clone_stage(model.stage(id).unwrap());
    assert_eq!(template.stage_type, StageType::StubConv);
    assert!(template.attrs.get_bool(vpuc_core::AttrKey::TryHw).unwrap());
    assert_eq!(template.attrs, *model.stage(id).unwrap().attrs());
}

/// `StubConv` whose weights and biases come from data of the given usages.
fn conv_stub_with(weights: DataUsage, biases: DataUsage) -> (Model, StageId) {
    let mut model = Model::new("net");
    let act = DataDesc::new(DataType::F16, vec![1, 4, 8, 8]).unwrap();
    let slot = |model: &mut Model, name: &str, usage: DataUsage, dims: Vec<usize>| {
        let desc = DataDesc::new(DataType::F16, dims).unwrap();
        match usage {
            DataUsage::Const => {
                let len = desc.total_dim_size();
                model.add_const_data(name, desc, vec![1.0; len]).unwrap()
            }
            DataUsage::Fake => model.add_fake_data().unwrap(),
            other => model.add_data(name, desc, other).unwrap(),
        }
    };
    let input = model.add_data("in", act.clone(), DataUsage::Input).unwrap();
    let output = model.add_data("out", act, DataUsage::Output).unwrap();
    let w = slot(&mut model, "w", weights, vec![4, 4, 3, 3]);
    let b = slot(&mut model, "b", biases, vec![4]);
    let id = model
        .add_stage("conv", StageType::StubConv, &[input, w, b], &[output])
        .unwrap();
    (model, id)
}

#[test]
fn test_stub_initial_check_enforces_slot_usages() {
    for (weights, biases, ok) in [
        (DataUsage::Const, DataUsage::Const, true),
        (DataUsage::Const, DataUsage::Fake, true),
        (DataUsage::Const, DataUsage::Intermediate, false),
        (DataUsage::Input, DataUsage::Fake, false),
    ] {
        let (model, id) = conv_stub_with(weights, biases);
        let ctx = StageCtx::new(&model, id).unwrap();
        let result = capabilities(StageType::StubConv).initial_check(&ctx);
        assert_eq!(result.is_ok(), ok, "weights {:?}, biases {:?}", weights, biases);
    }
}
